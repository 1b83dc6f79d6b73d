fn main() {
    if let Err(err) = swingtrack_lib::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
