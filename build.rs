// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto");

    // Only the client side of the SPIRE Server API is needed
    tonic_build::configure()
        .build_server(false)
        .compile_protos(
            &[
                "proto/spire/api/server/svid/v1/svid.proto",
                "proto/spire/api/server/bundle/v1/bundle.proto",
            ],
            &["proto"],
        )?;
    Ok(())
}
