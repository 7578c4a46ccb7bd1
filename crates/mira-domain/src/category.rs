use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemCategory {
	Gp,
	Specialist,
	Telehealth,
	AfterHours,
	Emergency,
	Imaging,
	Surgery,
	Pathology,
	Other,
}

/// Fixed taxonomy table from MBS group/subgroup to a coarse category set.
pub fn categories_for(group: Option<&str>, subgroup: Option<&str>) -> Vec<ItemCategory> {
	let Some(group) = group.map(str::trim).filter(|value| !value.is_empty()) else {
		return vec![ItemCategory::Other];
	};
	let group_upper = group.to_uppercase();
	let mut categories = Vec::new();

	match group_upper.as_str() {
		"A1" | "A7" => categories.push(ItemCategory::Gp),
		"A3" | "A4" | "A28" | "A29" => categories.push(ItemCategory::Specialist),
		"A40" => categories.push(ItemCategory::Telehealth),
		"A11" | "A22" | "A23" => categories.push(ItemCategory::AfterHours),
		"A21" => categories.push(ItemCategory::Emergency),
		"T1" =>
			if subgroup.map(str::trim) == Some("14") {
				categories.push(ItemCategory::Emergency);
			},
		"T8" => categories.push(ItemCategory::Surgery),
		_ => {},
	}

	if group_upper.starts_with('I') {
		categories.push(ItemCategory::Imaging);
	}
	if group_upper.starts_with('P') {
		categories.push(ItemCategory::Pathology);
	}
	if group_upper.to_lowercase().contains("anaes") {
		categories.push(ItemCategory::Surgery);
	}
	if categories.is_empty() {
		categories.push(ItemCategory::Other);
	}

	categories
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn maps_attendance_groups() {
		assert_eq!(categories_for(Some("A1"), None), vec![ItemCategory::Gp]);
		assert_eq!(categories_for(Some("A3"), None), vec![ItemCategory::Specialist]);
		assert_eq!(categories_for(Some("A40"), None), vec![ItemCategory::Telehealth]);
		assert_eq!(categories_for(Some("A21"), None), vec![ItemCategory::Emergency]);
	}

	#[test]
	fn t1_is_emergency_only_for_subgroup_14() {
		assert_eq!(categories_for(Some("T1"), Some("14")), vec![ItemCategory::Emergency]);
		assert_eq!(categories_for(Some("T1"), Some("2")), vec![ItemCategory::Other]);
	}

	#[test]
	fn prefix_groups_map_to_imaging_and_pathology() {
		assert_eq!(categories_for(Some("I3"), None), vec![ItemCategory::Imaging]);
		assert_eq!(categories_for(Some("P5"), None), vec![ItemCategory::Pathology]);
	}

	#[test]
	fn surgery_comes_from_t8_or_anaesthesia_groups() {
		assert_eq!(categories_for(Some("T8"), None), vec![ItemCategory::Surgery]);
		assert_eq!(categories_for(Some("T10 anaes"), None), vec![ItemCategory::Surgery]);
	}

	#[test]
	fn unknown_groups_are_other() {
		assert_eq!(categories_for(None, None), vec![ItemCategory::Other]);
		assert_eq!(categories_for(Some("D1"), None), vec![ItemCategory::Other]);
	}
}
