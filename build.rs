fn main() {
    println!("cargo:rerun-if-env-changed=ENVSENSE_CONFIG");

    // Host builds (tests, simulation) never link against ESP-IDF.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
