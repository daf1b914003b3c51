//! Build script for the infractl-provider crate.
//!
//! Regenerates Rust bindings from the plugin protocol definition when protoc
//! is available. If it is not, the build uses the checked-in placeholder
//! module at `src/proto.rs`, which hand-maintains the same message shapes.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/tfplugin5.proto");

    let protoc_available = std::process::Command::new("protoc")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);

    if protoc_available {
        tonic_build::configure()
            .build_client(true)
            .build_server(false)
            .out_dir("src/generated")
            .compile_protos(&["proto/tfplugin5.proto"], &["proto/"])?;
    } else {
        println!("cargo:warning=protoc not found, using checked-in placeholder proto definitions");
    }

    Ok(())
}
