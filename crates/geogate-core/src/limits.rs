//! Usage limits carried in a credential's `cons.limits` object.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{GateError, GateResult};

/// Maximum number of feature ids a single collection may list.
pub const MAX_FEATURES_PER_COLLECTION: usize = 10;

/// Unit of a `dataUsage` ceiling. Each step is a factor of 1024.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataUnit {
    Kb,
    Mb,
    Gb,
    Tb,
}

impl DataUnit {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "kb" => Some(Self::Kb),
            "mb" => Some(Self::Mb),
            "gb" => Some(Self::Gb),
            "tb" => Some(Self::Tb),
            _ => None,
        }
    }

    #[must_use]
    pub const fn multiplier(&self) -> u64 {
        match self {
            Self::Kb => 1 << 10,
            Self::Mb => 1 << 20,
            Self::Gb => 1 << 30,
            Self::Tb => 1 << 40,
        }
    }
}

/// Byte ceiling written as `"<n>:<unit>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataUsage {
    pub amount: u64,
    pub unit: DataUnit,
}

impl DataUsage {
    /// Parses `"100:mb"` style values.
    ///
    /// # Errors
    ///
    /// `BadRequest` on a missing separator, a non-integer amount, an unknown
    /// unit or a ceiling that does not fit in 64 bits.
    pub fn parse(value: &str) -> GateResult<Self> {
        let (amount, unit) = value
            .split_once(':')
            .ok_or_else(|| GateError::bad_request("Invalid dataUsage format"))?;
        let amount = amount
            .trim()
            .parse::<u64>()
            .map_err(|_| GateError::bad_request("Invalid dataUsage value"))?;
        let unit = DataUnit::parse(unit.trim())
            .ok_or_else(|| GateError::bad_request(format!("Invalid dataUsage unit `{unit}`")))?;
        let usage = Self { amount, unit };
        if usage.checked_bytes().is_none() {
            return Err(GateError::bad_request("dataUsage value too large"));
        }
        Ok(usage)
    }

    fn checked_bytes(&self) -> Option<u64> {
        self.amount.checked_mul(self.unit.multiplier())
    }

    /// Ceiling in bytes.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.checked_bytes().unwrap_or(u64::MAX)
    }
}

/// Envelope `[minX, minY, maxX, maxY]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Builds a limit envelope, checking WGS84 ranges and ordering.
    ///
    /// # Errors
    ///
    /// `BadRequest` for non-finite, out-of-range or inverted coordinates.
    pub fn new_limit(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> GateResult<Self> {
        let finite = [min_x, min_y, max_x, max_y].iter().all(|v| v.is_finite());
        let lon_ok = (-180.0..=180.0).contains(&min_x) && (-180.0..=180.0).contains(&max_x);
        let lat_ok = (-90.0..=90.0).contains(&min_y) && (-90.0..=90.0).contains(&max_y);
        if !finite || !lon_ok || !lat_ok || min_x >= max_x || min_y >= max_y {
            return Err(GateError::bad_request("Invalid bbox in token limits"));
        }
        Ok(Self {
            min_x,
            min_y,
            max_x,
            max_y,
        })
    }

    /// Parses the `bbox` query parameter: four numbers, or six with
    /// elevation (`minX,minY,minZ,maxX,maxY,maxZ`).
    ///
    /// # Errors
    ///
    /// `BadRequest` when the parameter is not a list of finite numbers of
    /// the right length.
    pub fn parse_query(value: &str) -> GateResult<Self> {
        let numbers = value
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| GateError::bad_request("Invalid bbox query parameter"))?;
        if numbers.iter().any(|v| !v.is_finite()) {
            return Err(GateError::bad_request("Invalid bbox query parameter"));
        }
        match numbers.as_slice() {
            [min_x, min_y, max_x, max_y] | [min_x, min_y, _, max_x, max_y, _] => Ok(Self {
                min_x: *min_x,
                min_y: *min_y,
                max_x: *max_x,
                max_y: *max_y,
            }),
            _ => Err(GateError::bad_request("Invalid bbox query parameter")),
        }
    }

    /// Closed-interval overlap; shared edges count.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }
}

/// A single enforceable limit.
#[derive(Debug, Clone, PartialEq)]
pub enum LimitRule {
    DataUsage(DataUsage),
    ApiHits(i64),
    /// Collection id to the feature ids the credential may address.
    Features(BTreeMap<String, Vec<String>>),
    BoundingBox(BoundingBox),
}

impl LimitRule {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::DataUsage(_) => "dataUsage",
            Self::ApiHits(_) => "apiHits",
            Self::Features(_) => "feat",
            Self::BoundingBox(_) => "bbox",
        }
    }
}

/// Parsed `limits` object.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageLimits {
    /// Start of the accounting window, epoch seconds.
    pub issued_at: i64,
    rules: Vec<LimitRule>,
}

impl UsageLimits {
    /// Parses a `limits` value, keeping rules in document order.
    ///
    /// # Errors
    ///
    /// `BadRequest` when the object or any recognised entry is malformed.
    pub fn parse(value: &Value) -> GateResult<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| GateError::bad_request("limits must be an object"))?;

        let mut issued_at = 0;
        let mut rules = Vec::new();
        for (key, entry) in object {
            match key.as_str() {
                "iat" => {
                    issued_at = entry
                        .as_i64()
                        .ok_or_else(|| GateError::bad_request("Invalid iat in token limits"))?;
                }
                "dataUsage" => {
                    let raw = entry
                        .as_str()
                        .ok_or_else(|| GateError::bad_request("Invalid dataUsage format"))?;
                    rules.push(LimitRule::DataUsage(DataUsage::parse(raw)?));
                }
                "apiHits" => {
                    let hits = entry
                        .as_i64()
                        .filter(|h| *h >= 0)
                        .ok_or_else(|| GateError::bad_request("Invalid apiHits value"))?;
                    rules.push(LimitRule::ApiHits(hits));
                }
                "feat" => rules.push(LimitRule::Features(parse_features(entry)?)),
                "bbox" => {
                    // An empty array carries no bounding box.
                    if entry.as_array().is_some_and(Vec::is_empty) {
                        continue;
                    }
                    rules.push(LimitRule::BoundingBox(parse_limit_bbox(entry)?));
                }
                other => warn!(key = other, "ignoring unrecognised limit key"),
            }
        }

        Ok(Self { issued_at, rules })
    }

    /// The rule this request is checked against.
    #[must_use]
    pub fn enforced_rule(&self) -> Option<&LimitRule> {
        self.rules.first()
    }

    #[must_use]
    pub fn rules(&self) -> &[LimitRule] {
        &self.rules
    }
}

fn parse_features(value: &Value) -> GateResult<BTreeMap<String, Vec<String>>> {
    let object: &Map<String, Value> = value
        .as_object()
        .ok_or_else(|| GateError::bad_request("feat must be an object"))?;

    let mut features = BTreeMap::new();
    for (collection, ids) in object {
        let ids = ids
            .as_array()
            .ok_or_else(|| GateError::bad_request("feat entries must be arrays"))?;
        if ids.len() > MAX_FEATURES_PER_COLLECTION {
            return Err(GateError::bad_request(format!(
                "at most {MAX_FEATURES_PER_COLLECTION} feature ids allowed per collection"
            )));
        }
        let ids = ids
            .iter()
            .map(|id| match id {
                Value::String(s) => Ok(s.clone()),
                Value::Number(n) => Ok(n.to_string()),
                _ => Err(GateError::bad_request("feature ids must be strings or numbers")),
            })
            .collect::<GateResult<Vec<_>>>()?;
        features.insert(collection.clone(), ids);
    }
    Ok(features)
}

fn parse_limit_bbox(value: &Value) -> GateResult<BoundingBox> {
    let coords = value
        .as_array()
        .filter(|arr| arr.len() == 4)
        .and_then(|arr| arr.iter().map(Value::as_f64).collect::<Option<Vec<_>>>())
        .ok_or_else(|| GateError::bad_request("bbox must be four numbers"))?;
    BoundingBox::new_limit(coords[0], coords[1], coords[2], coords[3])
}
