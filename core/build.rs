fn main() {
    uniffi::generate_scaffolding("src/sensorbox.udl").expect("failed to generate uniffi scaffolding");
}
