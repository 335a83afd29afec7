fn main() {
    // Propagates ESP-IDF sysenv (paths, link args) when building for the
    // device; a no-op for host builds.
    embuild::espidf::sysenv::output();
}
