fn main() {
    crowdwatch_lib::run()
}
