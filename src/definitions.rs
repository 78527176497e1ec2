/// The semantic type of a register, which decides how its raw value is interpreted.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    serde::Serialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MetricType {
    Temperature,
    Current,
    Dimensionless,
    BooleanYesNo,
    BooleanOnOff,
    TimePeriod,
    Power,
    Energy,
    Flow,
    Percentage,
    Pressure,
    Frequency,
}

impl MetricType {
    /// The `(true, false)` tokens MyUpway uses for boolean registers of this type.
    pub const fn boolean_tokens(self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::BooleanYesNo => Some(("yes", "no")),
            Self::BooleanOnOff => Some(("on", "off")),
            _ => None,
        }
    }

    pub const fn is_boolean(self) -> bool {
        self.boolean_tokens().is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct Unit(&'static str);

impl Unit {
    pub const CELSIUS: Self = Self("C");
    pub const AMPERES: Self = Self("A");
    pub const DEGREE_MINUTES: Self = Self("DM");
    pub const HOURS: Self = Self("h");
    pub const KILOWATTS: Self = Self("kW");
    pub const KILOWATT_HOURS: Self = Self("kWh");
    pub const LITERS_PER_MINUTE: Self = Self("l/m");
    pub const PERCENT: Self = Self("%");
    pub const BAR: Self = Self("bar");
    pub const HERTZ: Self = Self("Hz");
    pub const NONE: Self = Self("");

    // Short aliases for the tabulated `for_each_definition` listing below.
    const C: Self = Self::CELSIUS;
    const A: Self = Self::AMPERES;
    const DM: Self = Self::DEGREE_MINUTES;
    const H: Self = Self::HOURS;
    const KW: Self = Self::KILOWATTS;
    const KWH: Self = Self::KILOWATT_HOURS;
    const LPM: Self = Self::LITERS_PER_MINUTE;
    const PCT: Self = Self::PERCENT;
    const HZ: Self = Self::HERTZ;
    const __: Self = Self::NONE;

    pub const fn as_str(&self) -> &'static str {
        self.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

impl serde::Serialize for Unit {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct RegisterDefinition {
    pub id: u32,
    pub name: &'static str,
    #[serde(rename = "type")]
    pub kind: MetricType,
    pub unit: Unit,
}

impl RegisterDefinition {
    pub fn is_match(&self, pattern: &str) -> bool {
        let pattern = pattern.to_lowercase();
        self.name.to_lowercase().contains(&pattern) || self.id.to_string().contains(&pattern)
    }
}

/// A named subsystem bundling related registers, in the order they were declared.
#[derive(Debug, PartialEq, Eq, serde::Serialize)]
pub struct DefinitionGroup {
    pub name: &'static str,
    pub definitions: &'static [RegisterDefinition],
}

impl DefinitionGroup {
    pub fn all() -> &'static [DefinitionGroup] {
        GROUPS
    }

    pub fn by_name(name: &str) -> Option<&'static DefinitionGroup> {
        GROUPS.iter().find(|group| group.name == name)
    }

    /// Drop repeated groups, keeping the first occurrence of each in place.
    pub fn dedup(groups: &mut Vec<&'static DefinitionGroup>) {
        let mut seen = Vec::with_capacity(groups.len());
        groups.retain(|&group| {
            if seen.iter().any(|&other| std::ptr::eq(other, group)) {
                return false;
            }
            seen.push(group);
            true
        });
    }

    pub fn get(&self, id: u32) -> Option<&'static RegisterDefinition> {
        self.definitions.iter().find(|definition| definition.id == id)
    }

    /// Register IDs to request from the values endpoint for this group.
    pub fn variables(&self) -> impl Iterator<Item = u32> + use<> {
        self.definitions.iter().map(|definition| definition.id)
    }

    pub fn is_match(&self, pattern: &str) -> bool {
        self.name.contains(&pattern.to_lowercase())
    }
}

macro_rules! for_each_definition {
    ($m:ident) => {
        $m! {
            "tehowatti_status" {
                40067: Temperature,   C,   "avg. outdoor temp. BT1";
                40014: Temperature,   C,   "hot water charging BT6";
                40013: Temperature,   C,   "hot water top BT7";
                40004: Temperature,   C,   "outdoor temp. BT1";
                40083: Current,       A,   "current BE1";
                40081: Current,       A,   "current BE2";
                40079: Current,       A,   "current BE3";
                43005: Dimensionless, DM,  "degree minutes";
            }
            "tehowatti_hot_water" {
                48132: BooleanOnOff,  __,  "temporary lux";
                47041: Dimensionless, __,  "comfort mode";
            }
            "tehowatti_climate_system_1" {
                43161: BooleanYesNo,  __,  "external adjustment S1";
                47276: BooleanOnOff,  __,  "floor drying function";
                43009: Temperature,   C,   "calculated flow temp. S1";
                40071: Temperature,   C,   "external flow temp. BT25";
                40008: Temperature,   C,   "heat medium flow BT2";
                40012: Temperature,   C,   "return temp. BT3";
                40033: Temperature,   C,   "room temperature BT50";
            }
            "tehowatti_addition" {
                10033: BooleanYesNo,  __,  "blocked";
                47214: Current,       A,   "fuse size";
                43081: TimePeriod,    H,   "time factor";
                43084: Power,         KW,  "electrical addition power";
                47212: Power,         KW,  "set max electrical add.";
                40121: Temperature,   C,   "addition temperature BT63";
            }
            "tehowatti_heat_meter" {
                44302: Energy,        KWH, "cooling, compr. only.";
                44308: Energy,        KWH, "heating, compr. only.";
                44300: Energy,        KWH, "heating, int. add. incl.";
                44306: Energy,        KWH, "hotwater, compr. only.";
                44298: Energy,        KWH, "hw, incl. int. add";
                44304: Energy,        KWH, "pool, compr. only.";
                40072: Flow,          LPM, "flow BF1";
            }
            // Soft inputs (AUX1-AUX5) are not exposed.
            "inverter_m8_status" {
                44703: BooleanYesNo,  __,  "defrosting EB101";
                44396: Percentage,    PCT, "pump speed heating medium GP1";
                44362: Temperature,   C,   "outdoor temp. EB101-BT28";
            }
            "inverter_m8_compressor_module" {
                10014: BooleanYesNo,  __,  "blocked";
                44069: Dimensionless, __,  "compressor starts EB101";
                44702: BooleanYesNo,  __,  "cpr. protection mode EB101";
                44058: Temperature,   C,   "condenser out EB101-BT12";
                44363: Temperature,   C,   "evaporator EB101-BT16";
                44059: Temperature,   C,   "hot gas EB101-BT14";
                44060: Temperature,   C,   "liquid line EB101-BT15";
                44055: Temperature,   C,   "return temp. EB101-BT3";
                44061: Temperature,   C,   "suction gas EB101-BT17";
                44699: Pressure,      BAR, "high pressure sensor EB101";
                44700: Pressure,      BAR, "low pressure sensor EB101";
                44071: TimePeriod,    H,   "compressor operating time EB101";
                44073: TimePeriod,    H,   "compressor operating time hot water EB101";
                40737: TimePeriod,    H,   "compressor run time cooling EB101";
                44701: Frequency,     HZ,  "current compr. frequency EB101";
                40782: Frequency,     HZ,  "requested compressor freq EB101";
                40001: Frequency,     HZ,  "test";
            }
        }
    };
}

macro_rules! make_groups {
    ($($group: literal { $($id: literal: $kind: ident, $unit: ident, $name: literal;)* })*) => {
        const GROUP_TABLE: &[DefinitionGroup] = &[$(DefinitionGroup {
            name: $group,
            definitions: &[$(RegisterDefinition {
                id: $id,
                name: $name,
                kind: MetricType::$kind,
                unit: Unit::$unit,
            }),*],
        }),*];
    };
}

for_each_definition!(make_groups);

pub static GROUPS: &[DefinitionGroup] = GROUP_TABLE;

const fn str_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut index = 0;
    while index < a.len() {
        if a[index] != b[index] {
            return false;
        }
        index += 1;
    }
    true
}

// Group names and register IDs within a group must be unique.
const _: () = {
    let mut group_index = 0;
    while group_index < GROUP_TABLE.len() {
        let group = &GROUP_TABLE[group_index];
        let mut other_group = group_index + 1;
        while other_group < GROUP_TABLE.len() {
            if str_eq(group.name, GROUP_TABLE[other_group].name) {
                panic!("definition group names must be unique");
            }
            other_group += 1;
        }
        let mut index = 0;
        while index < group.definitions.len() {
            let mut other = index + 1;
            while other < group.definitions.len() {
                if group.definitions[index].id == group.definitions[other].id {
                    panic!("register IDs must be unique within a definition group");
                }
                other += 1;
            }
            index += 1;
        }
        group_index += 1;
    }
};
