fn main() {
    // ESP-IDF link/sysenv glue is only meaningful when building the
    // espidf feature for the Xtensa/RISC-V target.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
