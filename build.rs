fn main() {
    // ESP-IDF environment only exists for firmware builds; host test builds
    // have nothing to export.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
