//! 结构化日志的可观测性测试。

use std::net::SocketAddr;

use ssock_core::{
    AddressFamily, HookTable, ProtoDescriptor, ProtoType, SocketKind, SocketLayer,
    SocketLayerConfig, TransportError,
    test_stubs::{MemoryTransport, RecordingHooks},
};
use tracing_test::traced_test;

#[traced_test]
#[test]
fn lifecycle_transitions_are_logged() {
    let layer = SocketLayer::new(MemoryTransport::new(), SocketLayerConfig::default())
        .expect("default config is valid");
    let table = HookTable::from_arc(RecordingHooks::new("http"));
    layer.registry().register(&table).expect("register");

    let socket = layer
        .create(AddressFamily::Inet, SocketKind::Stream, 6)
        .expect("create");
    layer.attach_proto(&socket, ProtoDescriptor::new(table, ProtoType(1)));
    let local: SocketAddr = "127.0.0.1:0".parse().expect("address literal");
    layer.bind(&socket, local).expect("bind");
    layer.listen(&socket, 0).expect("listen");
    let child = layer
        .accept_notify(socket.id(), "10.1.1.1:9".parse().expect("address literal"))
        .expect("accept");
    layer
        .transport_error(
            child.id(),
            TransportError::Failed {
                detail: "reset by peer".into(),
            },
        )
        .expect("known socket");

    assert!(logs_contain("socket created"));
    assert!(logs_contain("socket listening"));
    assert!(logs_contain("connection accepted"));
    assert!(logs_contain("ssock.transport.failure"));
}
