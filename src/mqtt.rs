//! Publishes the channel values of the daemon to an MQTT broker.
//!
//! Every channel is published retained to `<topic>/<group>/<channel>`. When
//! the device reports fewer modules, the topics of the removed groups are
//! cleared with empty retained messages.

use crate::{new_handler, poll};
use anyhow::{bail, Context, Result};
use log::*;
use paho_mqtt as mqtt;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs::File;
use std::time::Duration;
use sunspec_mppt_lib::{
    channel::{ChannelUid, GroupId, ModuleTemplate, TemplateProvider, MODULE_TEMPLATE_ID},
    publish::ChannelValue,
    tokio_sync_safe_client::SafeClient,
};

const MQTT_APPENDIX_AVAILABILITY: &str = "availability";

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Topic prefix of all published messages
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Quality of service code to use
    #[serde(default)]
    qos: u8,
    pub client_id: Option<String>,
    #[serde(default = "default_keep_alive", with = "humantime_serde")]
    pub keep_alive: Duration,
}

fn default_topic() -> String {
    String::from("sunspec-mppt")
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(20)
}

impl MqttConfig {
    pub const DEFAULT_CONFIG_FILE: &'static str = "mqtt.yaml";

    pub fn load(config_file: &str) -> Result<Self> {
        debug!("Loading MQTT config file from {config_file:?}");
        let file = File::open(config_file)
            .with_context(|| format!("Cannot open MQTT config file {config_file:?}"))?;
        let config: Self = serde_yaml::from_reader(file)
            .with_context(|| format!("Cannot parse MQTT config file {config_file:?}"))?;
        config.qos()?;
        Ok(config)
    }

    pub fn qos(&self) -> Result<i32> {
        if self.qos > 2 {
            bail!("Invalid MQTT QoS {}, allowed values are 0, 1 and 2", self.qos);
        }
        Ok(self.qos.into())
    }

    fn client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("mpptcol-{:08x}", rand::random::<u32>()))
    }

    fn availability_topic(&self) -> String {
        format!("{}/{MQTT_APPENDIX_AVAILABILITY}", self.topic)
    }

    fn channel_topic(&self, uid: &ChannelUid) -> String {
        format!("{}/{}/{}", self.topic, uid.group, uid.channel)
    }
}

/// The payload of a channel value; quantities are published without unit.
fn payload(value: &ChannelValue) -> String {
    match value {
        ChannelValue::Quantity { value, .. } => value.to_string(),
        other => other.to_string(),
    }
}

struct Publisher {
    client: mqtt::Client,
    config: MqttConfig,
    qos: i32,
}

impl Publisher {
    fn connect(config: MqttConfig) -> Result<Self> {
        let qos = config.qos()?;
        let create_options = mqtt::CreateOptionsBuilder::new()
            .server_uri(&config.url)
            .client_id(config.client_id())
            .finalize();
        let mut client =
            mqtt::Client::new(create_options).with_context(|| "Error creating mqtt client")?;
        client.set_timeout(Duration::from_secs(5));

        let last_will =
            mqtt::Message::new_retained(config.availability_topic(), "offline", qos);
        let mut conn_builder = mqtt::ConnectOptionsBuilder::new();
        conn_builder
            .keep_alive_interval(config.keep_alive)
            .clean_session(true)
            .will_message(last_will);
        if let Some(user_name) = &config.username {
            conn_builder.user_name(user_name);
        }
        if let Some(password) = &config.password {
            conn_builder.password(password);
        }
        client
            .connect(conn_builder.finalize())
            .with_context(|| format!("Mqtt client unable to connect to {}", config.url))?;
        info!("Connected to MQTT broker {}", config.url);

        Ok(Self {
            client,
            config,
            qos,
        })
    }

    fn publish(&self, topic: String, payload: impl Into<Vec<u8>>) -> Result<()> {
        trace!("Publishing to {topic}");
        self.client
            .publish(mqtt::Message::new_retained(topic, payload, self.qos))
            .with_context(|| "Cannot publish mqtt message")
    }

    fn set_availability(&self, available: bool) -> Result<()> {
        let state = if available { "online" } else { "offline" };
        self.publish(self.config.availability_topic(), state)
    }

    fn clear_groups(&self, groups: &BTreeSet<GroupId>) -> Result<()> {
        for group in groups {
            let definitions = ModuleTemplate.channel_definitions(*group, MODULE_TEMPLATE_ID)?;
            for definition in definitions {
                self.publish(self.config.channel_topic(&definition.uid), Vec::new())?;
            }
        }
        Ok(())
    }

    fn publish_values(&self, values: &[(ChannelUid, ChannelValue)]) -> Result<()> {
        for (uid, value) in values {
            self.publish(self.config.channel_topic(uid), payload(value))?;
        }
        Ok(())
    }
}

/// Polls the device forever and publishes every cycle to the MQTT broker.
///
/// Failed polls are logged and retried in the next cycle; broker errors end
/// the daemon.
pub fn run_daemon(
    client: &SafeClient,
    delay: &Duration,
    poll_interval: &Duration,
    config_file: &str,
) -> Result<()> {
    let config = MqttConfig::load(config_file)?;
    trace!("MQTT config: {config:?}");
    let publisher = Publisher::connect(config)?;
    let mut handler = new_handler();
    let mut available = false;

    loop {
        match poll(client, &mut handler) {
            Ok(outcome) => {
                if !available {
                    publisher.set_availability(true)?;
                    available = true;
                }
                publisher.clear_groups(&outcome.delta.to_remove)?;
                publisher.publish_values(&outcome.values)?;
            }
            Err(error) => {
                warn!("Poll failed, retrying next cycle: {error:#}");
                if available {
                    publisher.set_availability(false)?;
                    available = false;
                }
            }
        }
        std::thread::sleep((*delay).max(*poll_interval));
    }
}
