fn main() {
    // Exposes GIT_COMMIT_HASH and friends through `built_info`.
    if let Err(e) = built::write_built_file() {
        panic!("Failed to acquire build-time information: {e}");
    }
}
