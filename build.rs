// Build script to compile the GLSL shaders to SPIR-V
//
// The renderer loads shaders/vert.spv and shaders/frag.spv at runtime. When
// glslc is missing the build still succeeds and prints the manual command.

use std::path::Path;
use std::process::Command;

const SHADERS: [(&str, &str); 2] = [
    ("shaders/shader.vert", "shaders/vert.spv"),
    ("shaders/shader.frag", "shaders/frag.spv"),
];

fn main() {
    for (source, _) in SHADERS {
        println!("cargo:rerun-if-changed={}", source);
    }

    for (source, output) in SHADERS {
        compile_shader(source, output);
    }
}

fn compile_shader(input: &str, output: &str) {
    let result = Command::new("glslc")
        .arg(Path::new(input))
        .arg("-o")
        .arg(Path::new(output))
        .status();

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input, status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}); {} was not compiled", e, input);
            println!("cargo:warning=compile it manually: glslc {} -o {}", input, output);
        }
    }
}
