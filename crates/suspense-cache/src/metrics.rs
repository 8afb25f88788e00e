//! Reports cache metrics to statsd.
//!
//! Nothing is sent until [`configure_statsd`] installs a client. Until then every `metric!` is a
//! no-op.
use std::collections::BTreeMap;
use std::net::{ToSocketAddrs, UdpSocket};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use cadence::{Metric, MetricBuilder, StatsdClient, UdpMetricSink};

static METRICS_CLIENT: OnceLock<MetricsClient> = OnceLock::new();

/// A statsd client along with the tags attached to everything it sends.
#[derive(Debug)]
pub(crate) struct MetricsClient {
    pub(crate) statsd: StatsdClient,
    global_tags: BTreeMap<String, String>,
}

impl MetricsClient {
    /// Adds the global tags to `metric` and sends it.
    #[inline(always)]
    pub(crate) fn send<'a, T>(&'a self, metric: MetricBuilder<'a, '_, T>)
    where
        T: Metric + From<String>,
    {
        self.global_tags
            .iter()
            .fold(metric, |metric, (tag, value)| metric.with_tag(tag, value))
            .send()
    }
}

/// Reports all metrics to the statsd server at `host`, prefixing their names with `prefix`.
///
/// Only the first call installs a client, later calls are logged and ignored.
pub fn configure_statsd<A: ToSocketAddrs>(
    prefix: &str,
    host: A,
    global_tags: BTreeMap<String, String>,
) -> Result<()> {
    let addrs: Vec<_> = host
        .to_socket_addrs()
        .context("failed to resolve statsd host")?
        .collect();
    if let Some(addr) = addrs.first() {
        tracing::info!("Reporting metrics to statsd at {}", addr);
    }

    let socket = UdpSocket::bind("0.0.0.0:0").context("failed to bind statsd socket")?;
    socket
        .set_nonblocking(true)
        .context("failed to configure statsd socket")?;
    let sink = UdpMetricSink::from(&addrs[..], socket).context("failed to create statsd sink")?;

    let client = MetricsClient {
        statsd: StatsdClient::from_sink(prefix, sink),
        global_tags,
    };
    if METRICS_CLIENT.set(client).is_err() {
        tracing::warn!("statsd client was already configured");
    }
    Ok(())
}

/// Calls `f` with the configured client, or returns the default if there is none.
#[inline(always)]
pub(crate) fn with_client<F, R>(f: F) -> R
where
    F: FnOnce(&MetricsClient) -> R,
    R: Default,
{
    METRICS_CLIENT.get().map(f).unwrap_or_default()
}

/// Emits a counter, gauge or timer with optional `"tag" => value` pairs.
macro_rules! metric {
    (counter($id:expr) += $value:expr $(, $k:expr => $v:expr)* $(,)?) => {
        metric!(@send count_with_tags($id, $value) $(, $k => $v)*)
    };
    (gauge($id:expr) = $value:expr $(, $k:expr => $v:expr)* $(,)?) => {
        metric!(@send gauge_with_tags($id, $value) $(, $k => $v)*)
    };
    (timer($id:expr) = $value:expr $(, $k:expr => $v:expr)* $(,)?) => {
        metric!(@send time_with_tags($id, $value) $(, $k => $v)*)
    };

    (@send $method:ident($id:expr, $value:expr) $(, $k:expr => $v:expr)*) => {{
        use cadence::prelude::*;
        $crate::metrics::with_client(|client| {
            client.send(client.statsd.$method($id, $value)$(.with_tag($k, $v))*)
        })
    }};
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_metric_is_sent_with_tags() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        server
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        let tags = BTreeMap::from([("env".to_owned(), "test".to_owned())]);
        configure_statsd("suspense", server.local_addr().unwrap(), tags).unwrap();
        assert!(with_client(|_| true));

        metric!(counter("metrics.test") += 2, "cache" => "users");

        // other tests may report their own metrics to this socket as well
        let mut buf = [0; 1024];
        let packet = loop {
            let len = server.recv(&mut buf).unwrap();
            let packet = std::str::from_utf8(&buf[..len]).unwrap().to_owned();
            if packet.starts_with("suspense.metrics.test") {
                break packet;
            }
        };
        assert_eq!(packet, "suspense.metrics.test:2|c|#cache:users,env:test");
    }
}
