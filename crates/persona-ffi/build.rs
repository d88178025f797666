fn main() {
    if let Err(e) = uniffi::generate_scaffolding("src/persona.udl") {
        panic!("failed to generate UniFFI scaffolding: {e}");
    }
}
