use std::collections::HashMap;

use qdrant_client::{
	Payload,
	qdrant::{Value as QdrantValue, value::Kind},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// One normalized catalog item. Both ingestion schemas collapse into this
/// shape, and it is what every vector payload carries.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
	pub item_num: String,
	pub description: String,
	pub category: Option<String>,
	pub group: Option<String>,
	pub subgroup: Option<String>,
	pub subheading: Option<String>,
	pub schedule_fee: Option<f64>,
	pub derived_fee: Option<String>,
	pub start_date: Option<String>,
	pub end_date: Option<String>,
	pub duration_min_minutes: Option<u32>,
	pub duration_max_minutes: Option<u32>,
	pub duration_min_inclusive: Option<bool>,
	pub duration_max_inclusive: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct NewRecord {
	item_num: Value,
	description: String,
	category: Option<String>,
	group: Option<String>,
	subgroup: Option<String>,
	subheading: Option<String>,
	schedule_fee: Option<f64>,
	derived_fee: Option<String>,
	start_date: Option<String>,
	end_date: Option<String>,
	duration_min_minutes: Option<u32>,
	duration_max_minutes: Option<u32>,
	duration_min_inclusive: Option<bool>,
	duration_max_inclusive: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct LegacyRecord {
	#[serde(rename = "ItemNum")]
	item_num: Value,
	#[serde(rename = "Description")]
	description: String,
	#[serde(rename = "Category")]
	category: Option<String>,
	#[serde(rename = "Group")]
	group: Option<String>,
	#[serde(rename = "ScheduleFee")]
	schedule_fee: Option<f64>,
	#[serde(rename = "ItemStartDate")]
	start_date: Option<String>,
	#[serde(rename = "ItemEndDate")]
	end_date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRecord {
	New(NewRecord),
	Legacy(LegacyRecord),
}

/// Parse a catalog file: either a bare JSON array of records or an object
/// with an `items` array. Records in either schema are accepted side by side.
pub fn parse_catalog(raw: &str) -> Result<Vec<CatalogRecord>> {
	let json: Value = serde_json::from_str(raw)?;
	let entries = match &json {
		Value::Array(entries) => entries.as_slice(),
		Value::Object(map) => map
			.get("items")
			.and_then(|v| v.as_array())
			.map(|v| v.as_slice())
			.ok_or_else(|| {
				Error::InvalidArgument(
					"Catalog object is missing an items array.".to_string(),
				)
			})?,
		_ => {
			return Err(Error::InvalidArgument(
				"Catalog file must be a JSON array or object.".to_string(),
			));
		},
	};
	let mut records = Vec::with_capacity(entries.len());

	for entry in entries {
		let raw: RawRecord = serde_json::from_value(entry.clone())?;

		records.push(normalize(raw)?);
	}

	Ok(records)
}

fn normalize(raw: RawRecord) -> Result<CatalogRecord> {
	match raw {
		RawRecord::New(record) => Ok(CatalogRecord {
			item_num: code_string(&record.item_num)?,
			description: record.description,
			category: record.category,
			group: record.group,
			subgroup: record.subgroup,
			subheading: record.subheading,
			schedule_fee: record.schedule_fee,
			derived_fee: record.derived_fee,
			start_date: record.start_date,
			end_date: record.end_date,
			duration_min_minutes: record.duration_min_minutes,
			duration_max_minutes: record.duration_max_minutes,
			duration_min_inclusive: record.duration_min_inclusive,
			duration_max_inclusive: record.duration_max_inclusive,
		}),
		RawRecord::Legacy(record) => Ok(CatalogRecord {
			item_num: code_string(&record.item_num)?,
			description: record.description,
			category: record.category,
			group: record.group,
			schedule_fee: record.schedule_fee,
			start_date: record.start_date,
			end_date: record.end_date,
			..Default::default()
		}),
	}
}

/// Item numbers arrive as JSON numbers or strings depending on the export.
fn code_string(value: &Value) -> Result<String> {
	match value {
		Value::String(code) if !code.trim().is_empty() => Ok(code.trim().to_string()),
		Value::Number(code) => Ok(code.to_string()),
		_ => Err(Error::InvalidArgument("Record item number must be a string or number.".to_string())),
	}
}

impl CatalogRecord {
	pub fn payload(&self) -> Payload {
		let mut payload = Payload::new();

		payload.insert("item_num", self.item_num.clone());
		payload.insert("description", self.description.clone());
		payload.insert("category", opt_string(&self.category));
		payload.insert("group", opt_string(&self.group));
		payload.insert("subgroup", opt_string(&self.subgroup));
		payload.insert("subheading", opt_string(&self.subheading));
		payload.insert("schedule_fee", self.schedule_fee.map(Value::from).unwrap_or(Value::Null));
		payload.insert("derived_fee", opt_string(&self.derived_fee));
		payload.insert("start_date", opt_string(&self.start_date));
		payload.insert("end_date", opt_string(&self.end_date));
		payload.insert(
			"duration_min_minutes",
			self.duration_min_minutes.map(|v| Value::from(v as i64)).unwrap_or(Value::Null),
		);
		payload.insert(
			"duration_max_minutes",
			self.duration_max_minutes.map(|v| Value::from(v as i64)).unwrap_or(Value::Null),
		);
		payload.insert(
			"duration_min_inclusive",
			self.duration_min_inclusive.map(Value::from).unwrap_or(Value::Null),
		);
		payload.insert(
			"duration_max_inclusive",
			self.duration_max_inclusive.map(Value::from).unwrap_or(Value::Null),
		);

		payload
	}

	pub fn from_payload(payload: &HashMap<String, QdrantValue>) -> Option<Self> {
		Some(Self {
			item_num: payload_str(payload, "item_num")?,
			description: payload_str(payload, "description").unwrap_or_default(),
			category: payload_str(payload, "category"),
			group: payload_str(payload, "group"),
			subgroup: payload_str(payload, "subgroup"),
			subheading: payload_str(payload, "subheading"),
			schedule_fee: payload_f64(payload, "schedule_fee"),
			derived_fee: payload_str(payload, "derived_fee"),
			start_date: payload_str(payload, "start_date"),
			end_date: payload_str(payload, "end_date"),
			duration_min_minutes: payload_u32(payload, "duration_min_minutes"),
			duration_max_minutes: payload_u32(payload, "duration_max_minutes"),
			duration_min_inclusive: payload_bool(payload, "duration_min_inclusive"),
			duration_max_inclusive: payload_bool(payload, "duration_max_inclusive"),
		})
	}
}

fn opt_string(value: &Option<String>) -> Value {
	value.clone().map(Value::String).unwrap_or(Value::Null)
}

fn payload_str(payload: &HashMap<String, QdrantValue>, key: &str) -> Option<String> {
	match payload.get(key)?.kind.as_ref()? {
		Kind::StringValue(value) if !value.is_empty() => Some(value.clone()),
		_ => None,
	}
}

fn payload_f64(payload: &HashMap<String, QdrantValue>, key: &str) -> Option<f64> {
	match payload.get(key)?.kind.as_ref()? {
		Kind::DoubleValue(value) => Some(*value),
		Kind::IntegerValue(value) => Some(*value as f64),
		_ => None,
	}
}

fn payload_u32(payload: &HashMap<String, QdrantValue>, key: &str) -> Option<u32> {
	match payload.get(key)?.kind.as_ref()? {
		Kind::IntegerValue(value) => u32::try_from(*value).ok(),
		Kind::DoubleValue(value) if *value >= 0.0 => Some(*value as u32),
		_ => None,
	}
}

fn payload_bool(payload: &HashMap<String, QdrantValue>, key: &str) -> Option<bool> {
	match payload.get(key)?.kind.as_ref()? {
		Kind::BoolValue(value) => Some(*value),
		_ => None,
	}
}
