use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    num::NonZeroUsize,
};

use clap::Parser;

use crate::hub::{DEFAULT_EVENT_CAPACITY, DEFAULT_OUTBOUND_CAPACITY, HubConfig};

const EVENT_CAPACITY: NonZeroUsize = NonZeroUsize::new(DEFAULT_EVENT_CAPACITY).unwrap();
const OUTBOUND_CAPACITY: NonZeroUsize = NonZeroUsize::new(DEFAULT_OUTBOUND_CAPACITY).unwrap();

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Address to bind the websocket listener to.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Port to listen on. Use 0 for an ephemeral port.
    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Events the hub queues before connection handlers have to wait.
    #[arg(long, env = "HUB_EVENT_CAPACITY", default_value_t = EVENT_CAPACITY)]
    pub event_capacity: NonZeroUsize,

    /// Frames queued per client before new ones are dropped.
    #[arg(long, env = "HUB_OUTBOUND_CAPACITY", default_value_t = OUTBOUND_CAPACITY)]
    pub outbound_capacity: NonZeroUsize,
}

impl Cli {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            event_capacity: self.event_capacity.get(),
            outbound_capacity: self.outbound_capacity.get(),
        }
    }
}
