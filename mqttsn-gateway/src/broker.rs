use mqttsn_core::QoS;

/// The upstream MQTT client a gateway bridges through.
///
/// Only the operations the bridge needs are on the seam; connection
/// management belongs to the embedding, which reports state changes and
/// downstream deliveries through [`Gateway::on_broker_connect`] and
/// [`Gateway::on_broker_publish`].
///
/// None of these calls may block: a publish or subscription change that
/// cannot be handed off synchronously is the implementation's to buffer or
/// drop.
///
/// [`Gateway::on_broker_connect`]: crate::Gateway::on_broker_connect
/// [`Gateway::on_broker_publish`]: crate::Gateway::on_broker_publish
pub trait BrokerClient {
    /// Forwards one application message upstream.
    fn publish(&mut self, topic: &[u8], payload: &[u8], qos: QoS, retain: bool);

    /// Opens or upgrades an upstream subscription.
    fn subscribe(&mut self, topic: &[u8], qos: QoS);

    /// Drops an upstream subscription.
    fn unsubscribe(&mut self, topic: &[u8]);
}
