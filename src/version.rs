/// Library version, from the crate metadata.
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
