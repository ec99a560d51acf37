use rand::Rng;

/// Generates a random identifier of the form `<prefix>-<16 hex digits>`
pub fn generate_id(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let nonce: [u8; 8] = rng.gen();
    format!("{}-{}", prefix, hex::encode(nonce))
}
