fn main() {
    if let Err(err) = projorch::cli::run() {
        projorch::ui::eprintln_error(&err);
        std::process::exit(projorch::exit::exit_code(&err));
    }
}
