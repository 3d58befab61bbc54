//! Generated crate manifest

use hdrbind_core::config::EmitConfig;

/// `Cargo.toml` of the generated bindings crate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    pub description: String,
}

impl Manifest {
    pub fn new(config: &EmitConfig, entry: &str, arch: &str) -> Self {
        Self {
            name: config.crate_name.clone(),
            version: config.crate_version.clone(),
            description: format!("Rust bindings for {} ({}) generated by hdrbind", entry, arch),
        }
    }

    pub fn render(&self) -> String {
        format!(
            "[package]\n\
             name = \"{}\"\n\
             version = \"{}\"\n\
             edition = \"2021\"\n\
             description = \"{}\"\n\
             \n\
             [lib]\n\
             path = \"src/lib.rs\"\n",
            self.name,
            self.version,
            self.description.replace('"', "\\\"")
        )
    }
}
