#[macro_use]
extern crate log;

use std::thread;
use std::time::{Duration, Instant};

use structopt::StructOpt;

use mqttsn_core::{QoS, UdpTransport};
use mqttsn_gateway::{BrokerClient, Gateway};

#[derive(StructOpt, Debug)]
#[structopt(
    name = "gateway",
    about = "a standalone MQTT-SN gateway over broadcast UDP"
)]
struct Opt {
    /// The UDP port shared by every MQTT-SN party on the link.
    #[structopt(short, long, default_value = "20000")]
    port: u16,

    /// The gateway's one-byte link address.
    #[structopt(short, long, default_value = "1")]
    address: u8,

    /// The gateway id announced in GWINFO.
    #[structopt(short, long, default_value = "1")]
    gw_id: u8,
}

/// Stands in for the upstream MQTT client. Without a broker the gateway
/// serves its own clients, so the bridge half only logs what it would do.
struct NoBroker;

impl BrokerClient for NoBroker {
    fn publish(&mut self, topic: &[u8], payload: &[u8], qos: QoS, _retain: bool) {
        debug!(
            "no broker: {} bytes on {} at {:?} stay local",
            payload.len(),
            String::from_utf8_lossy(topic),
            qos
        );
    }

    fn subscribe(&mut self, _topic: &[u8], _qos: QoS) {}

    fn unsubscribe(&mut self, _topic: &[u8]) {}
}

fn main() -> std::io::Result<()> {
    pretty_env_logger::init();

    let opt = Opt::from_args();
    let transport = UdpTransport::bind(opt.port, opt.address)?;
    let mut gateway = Gateway::new(opt.gw_id, NoBroker, transport, Instant::now());

    info!("gateway {} listening on port {}", opt.gw_id, opt.port);

    loop {
        thread::sleep(Duration::from_millis(50));
        gateway.poll(Instant::now());
    }
}
