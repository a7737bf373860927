// SPDX-License-Identifier: GPL-3.0-only
//! WGSL sources for the compositor

/// Quad compositing shader: `vs_main` places the quad, `fs_main` samples it
pub const COMPOSITE_SHADER: &str = include_str!("composite.wgsl");

pub const VERTEX_ENTRY: &str = "vs_main";
pub const FRAGMENT_ENTRY: &str = "fs_main";

/// Vertices per quad draw
pub const QUAD_VERTICES: u32 = 6;

#[cfg(test)]
mod tests {
    use super::*;

    /// Validate that a WGSL shader compiles successfully using naga
    fn validate_shader(name: &str, source: &str) -> naga::Module {
        let module = match naga::front::wgsl::parse_str(source) {
            Ok(module) => module,
            Err(e) => panic!("Shader '{}' parse failed: {:?}", name, e),
        };
        let info = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        )
        .validate(&module);
        if let Err(e) = info {
            panic!("Shader '{}' validation failed: {:?}", name, e);
        }
        module
    }

    #[test]
    fn test_composite_shader_validates() {
        let module = validate_shader("composite", COMPOSITE_SHADER);
        let entries: Vec<&str> = module.entry_points.iter().map(|e| e.name.as_str()).collect();
        assert!(entries.contains(&VERTEX_ENTRY));
        assert!(entries.contains(&FRAGMENT_ENTRY));
    }
}
