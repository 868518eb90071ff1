fn main() {
    dawnbell_lib::run()
}
