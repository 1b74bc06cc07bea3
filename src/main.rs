fn main() {
    if let Err(e) = drive_organizer::run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
