use super::Error;
use crate::augment::AugmentedGroup;
use crate::definitions::DefinitionGroup;
use crate::homie::value;
use homie5::HomieID;
use homie5::device_description::HomieNodeDescription;

/// A Homie node exposing the registers of one definition group as properties.
pub(crate) struct GroupNode {
    group: &'static DefinitionGroup,
    node_id: HomieID,
    /// Property IDs, parallel to `group.definitions`.
    prop_ids: Vec<HomieID>,
    /// The last payload published for each property.
    published: Vec<Option<String>>,
    polled: bool,
}

pub(crate) fn homie_id(id: String) -> Result<HomieID, Error> {
    HomieID::try_from(id.clone()).map_err(|_| Error::InvalidId(id))
}

impl GroupNode {
    pub(crate) fn new(group: &'static DefinitionGroup) -> Result<Self, Error> {
        let node_id = homie_id(group.name.replace('_', "-"))?;
        let prop_ids = group
            .definitions
            .iter()
            .map(|definition| homie_id(definition.id.to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            group,
            node_id,
            published: vec![None; prop_ids.len()],
            prop_ids,
            polled: false,
        })
    }

    pub(crate) fn node_id(&self) -> &HomieID {
        &self.node_id
    }

    pub(crate) fn group(&self) -> &'static DefinitionGroup {
        self.group
    }

    pub(crate) fn description(&self) -> HomieNodeDescription {
        let properties = self
            .prop_ids
            .iter()
            .zip(self.group.definitions)
            .map(|(prop_id, definition)| (prop_id.clone(), value::property_description(definition)))
            .collect();
        HomieNodeDescription {
            name: Some(self.group.name.replace('_', " ")),
            r#type: None,
            properties,
        }
    }

    /// Remember the values of a poll, returning the properties whose payload changed.
    ///
    /// Registers without a (usable) value keep their previously published payload.
    pub(crate) fn record_readings(&mut self, readings: &AugmentedGroup) -> Vec<(HomieID, String)> {
        self.polled = true;
        let mut changed = Vec::new();
        for reading in &readings.readings {
            let Some(index) =
                self.group.definitions.iter().position(|d| d.id == reading.definition.id)
            else {
                continue;
            };
            let Some(payload) = reading.value.as_ref().and_then(|v| value::payload(reading.definition, v))
            else {
                continue;
            };
            if self.published[index].as_ref() == Some(&payload) {
                continue;
            }
            self.published[index] = Some(payload.clone());
            changed.push((self.prop_ids[index].clone(), payload));
        }
        changed
    }

    pub(crate) fn record_read_error(&mut self) {
        self.polled = true;
    }

    /// Whether this node has seen the outcome of at least one poll.
    pub(crate) fn polled(&self) -> bool {
        self.polled
    }
}
