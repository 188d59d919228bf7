use tracing::Span;
use crate::feed::proxy::ProxyEndpoint;
use crate::types::ids::ConnectionId;

pub fn trace_stream_connection(id: &ConnectionId, proxy: &ProxyEndpoint) -> Span {
    tracing::info_span!(
        "stream_connection",
        connection_id = %id,
        proxy = %proxy,
    )
}

pub fn trace_simulation_tick(symbols: usize) -> Span {
    tracing::info_span!(
        "simulation_tick",
        symbols,
    )
}
