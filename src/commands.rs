pub mod definitions {
    use crate::definitions::{DefinitionGroup, RegisterDefinition};
    use crate::output;

    /// Search and output the known MyUpway registers.
    #[derive(clap::Parser)]
    pub struct Args {
        /// Only list registers whose group, name or ID contains this text.
        filter: Option<String>,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not output the definitions")]
        Output(#[source] output::Error),
    }

    #[derive(serde::Serialize)]
    struct DefinitionRecord<'a> {
        group: &'static str,
        #[serde(flatten)]
        definition: &'a RegisterDefinition,
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let Args { filter, output } = args;
        let mut output = output.to_output().map_err(Error::Output)?;
        output
            .table_headers(vec!["Group", "ID", "Name", "Type", "Unit"])
            .map_err(Error::Output)?;
        for group in DefinitionGroup::all() {
            for definition in group.definitions {
                if let Some(pattern) = &filter {
                    if !group.is_match(pattern) && !definition.is_match(pattern) {
                        continue;
                    }
                }
                output
                    .record(
                        || {
                            vec![vec![
                                group.name.to_string(),
                                definition.id.to_string(),
                                definition.name.to_string(),
                                definition.kind.to_string(),
                                definition.unit.to_string(),
                            ]]
                        },
                        || DefinitionRecord { group: group.name, definition },
                    )
                    .map_err(Error::Output)?;
            }
        }
        output.commit().map_err(Error::Output)
    }
}

pub mod read {
    use crate::augment::{Reading, augment};
    use crate::connection::{self, Connection};
    use crate::definitions::DefinitionGroup;
    use crate::output;

    /// Log in to MyUpway and output the current values of the registers.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        /// Only read this definition group. May be given multiple times; all groups are read by
        /// default.
        #[arg(long = "group", short = 'g', value_parser = parse_group)]
        groups: Vec<&'static DefinitionGroup>,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not read values from MyUpway")]
        Connection(#[source] connection::Error),
        #[error("could not output the readings")]
        Output(#[source] output::Error),
    }

    pub(crate) fn parse_group(name: &str) -> Result<&'static DefinitionGroup, String> {
        DefinitionGroup::by_name(name).ok_or_else(|| {
            let known = DefinitionGroup::all().iter().map(|g| g.name).collect::<Vec<_>>();
            format!("unknown definition group (known groups: {})", known.join(", "))
        })
    }

    pub(crate) fn groups_or_all(
        groups: Vec<&'static DefinitionGroup>,
    ) -> Vec<&'static DefinitionGroup> {
        if groups.is_empty() {
            return DefinitionGroup::all().iter().collect();
        }
        let mut groups = groups;
        DefinitionGroup::dedup(&mut groups);
        groups
    }

    #[derive(serde::Serialize)]
    struct GroupRecord<'a> {
        system_id: u64,
        fetched_at: jiff::Timestamp,
        group: &'a str,
        readings: &'a [Reading<'a>],
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let Args { connection, groups, output } = args;
        let groups = groups_or_all(groups);
        let system_id = connection.system_id();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::Runtime)?;
        let augmented = runtime
            .block_on(async {
                let connection = Connection::login(connection).await?;
                let mut augmented = Vec::with_capacity(groups.len());
                for group in groups {
                    let values = connection.fetch_values(group).await?;
                    augmented.push(augment(group, &values));
                }
                Ok::<_, connection::Error>(augmented)
            })
            .map_err(Error::Connection)?;
        let fetched_at = jiff::Timestamp::now();

        let mut output = output.to_output().map_err(Error::Output)?;
        output
            .table_headers(vec!["Group", "ID", "Name", "Value", "Unit"])
            .map_err(Error::Output)?;
        for group in &augmented {
            output
                .record(
                    || {
                        group
                            .readings
                            .iter()
                            .map(|reading| {
                                vec![
                                    group.name.to_string(),
                                    reading.definition.id.to_string(),
                                    reading.definition.name.to_string(),
                                    reading.value.as_ref().map(|v| v.to_string()).unwrap_or_default(),
                                    reading.definition.unit.to_string(),
                                ]
                            })
                            .collect()
                    },
                    || GroupRecord {
                        system_id,
                        fetched_at,
                        group: group.name,
                        readings: &group.readings,
                    },
                )
                .map_err(Error::Output)?;
        }
        output.commit().map_err(Error::Output)
    }
}


pub mod homie {
    use crate::connection::{self, Connection};
    use crate::definitions::DefinitionGroup;
    use crate::homie::{MyUpwayDevice, convert_last_will};
    use homie5::{Homie5DeviceProtocol, HomieDomain, HomieID};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::task::AbortOnDropHandle;

    /// Publish the MyUpway readings as a Homie device over MQTT.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,

        /// Only expose this definition group. May be given multiple times; all groups are exposed
        /// by default.
        #[arg(long = "group", short = 'g', value_parser = super::read::parse_group)]
        groups: Vec<&'static DefinitionGroup>,

        /// How often to read the values from MyUpway.
        #[arg(long, default_value = "60s")]
        poll_interval: humantime::Duration,

        /// The Homie device ID. Defaults to `myupway-<system id>`.
        #[arg(long)]
        device_id: Option<String>,

        /// The MQTT broker to publish to.
        #[arg(long, default_value = "localhost")]
        mqtt_host: String,

        #[arg(long, default_value = "1883")]
        mqtt_port: u16,

        #[arg(long, default_value = "myupway-tools")]
        mqtt_client_id: String,

        #[arg(long, env = "MYUPWAY_MQTT_USER")]
        mqtt_user: Option<String>,

        #[arg(long, env = "MYUPWAY_MQTT_PASSWORD", hide_env_values = true, requires = "mqtt_user")]
        mqtt_password: Option<String>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("the polling interval must not be zero")]
        ZeroPollInterval,
        #[error("`{0}` is not a valid Homie device ID")]
        InvalidDeviceId(String),
        #[error("could not log in to MyUpway")]
        Connection(#[source] connection::Error),
        #[error("the Homie device failed")]
        Device(#[source] crate::homie::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        if args.poll_interval.is_zero() {
            return Err(Error::ZeroPollInterval);
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(Error::Runtime)?;
        runtime.block_on(serve(args))
    }

    async fn serve(args: Args) -> Result<(), Error> {
        let device_id =
            args.device_id.unwrap_or_else(|| format!("myupway-{}", args.connection.system_id()));
        let device_id =
            HomieID::try_from(device_id.clone()).map_err(|_| Error::InvalidDeviceId(device_id))?;
        let connection = Connection::login(args.connection).await.map_err(Error::Connection)?;

        let (protocol, last_will) = Homie5DeviceProtocol::new(device_id, HomieDomain::Default);
        let mut options =
            rumqttc::v5::MqttOptions::new(args.mqtt_client_id, args.mqtt_host, args.mqtt_port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_last_will(convert_last_will(last_will));
        if let Some(user) = args.mqtt_user {
            options.set_credentials(user, args.mqtt_password.unwrap_or_default());
        }
        let (mqtt, mut event_loop) = rumqttc::v5::AsyncClient::new(options, 64);
        let _mqtt_task = AbortOnDropHandle::new(tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(event) => tracing::trace!(?event, "mqtt event"),
                    Err(e) => {
                        tracing::warn!(
                            error = (&e as &dyn std::error::Error),
                            "mqtt connection failed, will reconnect"
                        );
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }));

        let groups = super::read::groups_or_all(args.groups);
        let device = MyUpwayDevice::new(
            mqtt,
            protocol,
            Arc::new(connection),
            groups,
            *args.poll_interval,
        )
        .map_err(Error::Device)?;
        device.run().await.map_err(Error::Device)
    }
}
