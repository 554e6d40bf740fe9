fn main() -> std::process::ExitCode {
    quickstart_launcher::run()
}
