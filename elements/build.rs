use prost_build;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = prost_build::Config::new();
    config.protoc_arg("--experimental_allow_proto3_optional");

    tonic_build::configure().compile_with_config(
        config,
        &["src/proto/mookodi_common.proto",
          "src/proto/mookodi_camera.proto",
          "src/proto/mookodi_instrument.proto"],
        &["src/proto"])?;
    Ok(())
}
