fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Compile proto files for the services discovery-sync talks to:
    // - access_graph.proto: access graph service (resource event stream)
    // - health.proto: standard gRPC health service, watched to detect dead connections
    tonic_build::configure()
        .build_server(false) // Client only
        .build_client(true)
        .btree_map(["."])
        .compile_protos(&["proto/access_graph.proto", "proto/health.proto"], &["proto"])?;
    Ok(())
}
