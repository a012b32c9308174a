use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};

/// Attribute selecting the value conversion of an entry.
pub const CONVERSION_KEY: &str = "sc_conv";
/// Short alias of [`CONVERSION_KEY`].
pub const CONVERSION_ALIAS: &str = "conv";

/// Transform from the raw field value to a readable value.
///
/// Selected by the `sc_conv` attribute, e.g. `sc_conv="linear scale=0.5 offset=-1"`
/// or `sc_conv="enum 0=OFF 1=ON"`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Conversion {
    #[default]
    Pass,
    Linear {
        scale: f64,
        offset: f64,
    },
    Enum(BTreeMap<u32, String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConvertedValue {
    Raw(u32),
    Scaled(f64),
    Named(String),
}

impl Display for ConvertedValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConvertedValue::Raw(v) => write!(f, "{v:#010x}"),
            ConvertedValue::Scaled(v) => write!(f, "{v}"),
            ConvertedValue::Named(v) => f.write_str(v),
        }
    }
}

impl Conversion {
    /// Resolves the conversion of `name` from its attributes.
    ///
    /// Unknown conversion names fall back to [`Conversion::Pass`] with a warning.
    pub fn from_attributes(name: &str, attributes: &HashMap<String, String>) -> Self {
        let conv = attributes
            .get(CONVERSION_KEY)
            .or_else(|| attributes.get(CONVERSION_ALIAS));
        match conv {
            None => Conversion::Pass,
            Some(conv) => Self::parse(conv).unwrap_or_else(|| {
                log::warn!("{name}: unknown item conversion \"{conv}\"");
                Conversion::Pass
            }),
        }
    }

    /// Parses `"<kind> key=value ..."`. Returns `None` for an unknown kind.
    pub fn parse(conv: &str) -> Option<Self> {
        let mut words = conv.split_whitespace();
        let kind = words.next().unwrap_or("");
        let params: Vec<(&str, &str)> = words
            .map(|w| w.split_once('=').unwrap_or((w, "")))
            .collect();

        match kind {
            "pass" => Some(Conversion::Pass),
            "linear" => {
                let param = |key: &str| {
                    params
                        .iter()
                        .find(|(k, _)| *k == key)
                        .and_then(|(_, v)| v.parse::<f64>().ok())
                        .unwrap_or(0.0)
                };
                Some(Conversion::Linear {
                    scale: param("scale"),
                    offset: param("offset"),
                })
            }
            "enum" => {
                let mut names = BTreeMap::new();
                for (key, value) in params {
                    match super::parse_c_integer(key) {
                        Ok(number) => {
                            names.insert(number, value.to_string());
                        }
                        Err(_) => log::debug!("enum conversion skips \"{key}\""),
                    }
                }
                Some(Conversion::Enum(names))
            }
            _ => None,
        }
    }

    pub fn convert(&self, raw: u32) -> ConvertedValue {
        match self {
            Conversion::Pass => ConvertedValue::Raw(raw),
            Conversion::Linear { scale, offset } => {
                ConvertedValue::Scaled(raw as f64 * scale + offset)
            }
            Conversion::Enum(names) => match names.get(&raw) {
                Some(name) => ConvertedValue::Named(name.clone()),
                None => ConvertedValue::Named(format!("???? 0x{raw:08X}")),
            },
        }
    }
}
