#[macro_use]
extern crate log;

use std::thread;
use std::time::{Duration, Instant};

use structopt::StructOpt;

use mqttsn_client::{Client, ClientState, GatewayInfo, PubTopic, SubTopic};
use mqttsn_core::{Address, Flags, UdpTransport};

#[derive(StructOpt, Debug)]
#[structopt(
    name = "sub_client",
    about = "an MQTT-SN client publishing and subscribing over broadcast UDP"
)]
struct Opt {
    /// The UDP port shared by every MQTT-SN party on the link.
    #[structopt(short, long, default_value = "20000")]
    port: u16,

    /// This client's one-byte link address.
    #[structopt(short, long, default_value = "2")]
    address: u8,

    /// The gateway's one-byte link address.
    #[structopt(short, long, default_value = "1")]
    gateway: u8,

    /// The id to use for this client.
    #[structopt(short, long, default_value = "sub_client")]
    id: String,

    /// The number of seconds of silence after which the gateway may consider
    /// us gone.
    #[structopt(short, long, default_value = "30")]
    keep_alive: u16,
}

fn main() -> std::io::Result<()> {
    pretty_env_logger::init();

    let opt = Opt::from_args();

    let transport = UdpTransport::bind(opt.port, opt.address)?;
    let mut client = Client::new(opt.id.into_bytes(), transport, Instant::now());
    client.add_gateways(&[GatewayInfo::new(
        opt.gateway,
        Address::new(vec![opt.gateway]),
    )]);
    client.on_message(|topic, data, _flags| {
        info!("{}: {:?}", String::from_utf8_lossy(topic), data);
    });

    client.connect(Instant::now(), opt.gateway, Flags::default(), opt.keep_alive);

    let pub_topics = [PubTopic::new(&b"led"[..])];
    let sub_topics = [SubTopic::new(&b"button"[..], Flags::default())];

    let mut led_state = [0u8];
    let mut last_publish = Instant::now();

    loop {
        thread::sleep(Duration::from_millis(50));
        let now = Instant::now();
        client.poll(now);

        if let ClientState::Disconnected | ClientState::Lost = client.state() {
            warn!("gateway connection lost");
        }

        // drive the registrations until they have all completed
        if !client.register_topics(now, &pub_topics) {
            continue;
        }
        if !client.subscribe_topics(now, &sub_topics) {
            continue;
        }

        // toggle the led topic every 5 seconds
        if now.duration_since(last_publish) > Duration::from_secs(5) {
            led_state[0] ^= 1;
            client.publish(now, b"led", &led_state, Flags::default());
            last_publish = now;
        }
    }
}
