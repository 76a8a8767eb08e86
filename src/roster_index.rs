use std::collections::HashMap;

use crate::models::RosterEntry;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterPerson {
    pub name: String,
    pub department: String,
}

/// Lookup from id number to the roster's name and department.
#[derive(Debug, Clone, Default)]
pub struct RosterIndex {
    people: HashMap<String, RosterPerson>,
}

impl RosterIndex {
    /// Later entries with the same id number overwrite earlier ones.
    pub fn build(entries: &[RosterEntry]) -> Self {
        let mut people = HashMap::new();
        for entry in entries {
            let id_number = entry.id_number.trim();
            if id_number.is_empty() {
                continue;
            }
            people.insert(
                id_number.to_string(),
                RosterPerson {
                    name: entry.name.trim().to_string(),
                    department: entry.department.trim().to_string(),
                },
            );
        }
        Self { people }
    }

    pub fn get(&self, id_number: &str) -> Option<&RosterPerson> {
        self.people.get(id_number)
    }

    pub fn len(&self) -> usize {
        self.people.len()
    }

    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id_number: &str, name: &str, department: &str) -> RosterEntry {
        RosterEntry {
            period_id: 1,
            id_number: id_number.to_string(),
            name: name.to_string(),
            department: department.to_string(),
            title: String::new(),
            remarks: String::new(),
        }
    }

    #[test]
    fn last_duplicate_wins_and_blank_ids_are_ignored() {
        let index = RosterIndex::build(&[
            entry("A1", "张三", "财务部"),
            entry("", "无名", "行政部"),
            entry("A1", "张三", "审计部"),
            entry(" B2 ", "李四", "人事部"),
        ]);
        assert_eq!(index.len(), 2);
        assert_eq!(
            index.get("A1").map(|p| p.department.as_str()),
            Some("审计部")
        );
        assert_eq!(index.get("B2").map(|p| p.name.as_str()), Some("李四"));
        assert!(index.get("").is_none());
    }
}
