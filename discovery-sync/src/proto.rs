//! Generated protobuf types for discovery-sync.

/// Access graph service
pub mod accessgraph {
    tonic::include_proto!("discovery.accessgraph.v1");
}

/// gRPC health service
pub mod health {
    tonic::include_proto!("grpc.health.v1");
}
