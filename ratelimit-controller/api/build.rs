use std::path::PathBuf;

const PROTOS: &[&str] = &[
    "proto/google/rpc/status.proto",
    "proto/envoy/config/core/v3/base.proto",
    "proto/envoy/service/discovery/v3/discovery.proto",
    "proto/ratelimit/config/ratelimit/v3/rls_conf.proto",
    "proto/ratelimit/service/ratelimit/v3/rls_conf_ds.proto",
    "proto/ratelimit/controlplane/v1/events.proto",
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto");

    // Use the vendored protoc so builds don't depend on the host toolchain.
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    let includes = [PathBuf::from("proto"), protoc_bin_vendored::include_path()?];

    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_protos(PROTOS, &includes)?;

    Ok(())
}
