fn main() {
    if let Err(e) = shell_engine::core::Shell::run() {
        eprintln!("Shell failed to start: {}", e);
        std::process::exit(1);
    }
}
