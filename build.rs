fn main() {
    // ESP-IDF link arguments; host builds have nothing to emit.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
