use serde::{Deserialize, Serialize};

/// One row of the external authority's snapshot.
///
/// Wire form is `{"id": 200, "name": "South"}`; the authority's older
/// payloads spell the name field `nome`, which is accepted too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalUnit {
    #[serde(rename = "id")]
    pub external_id: i64,

    #[serde(alias = "nome")]
    pub name: String,
}

impl ExternalUnit {
    pub fn new(external_id: i64, name: impl Into<String>) -> Self {
        ExternalUnit {
            external_id,
            name: name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_accepts_name_and_nome() {
        let units: Vec<ExternalUnit> = serde_json::from_str(
            r#"[{"id": 1, "name": "North"}, {"id": 2, "nome": "South"}]"#,
        )
        .unwrap();

        assert_eq!(units[0], ExternalUnit::new(1, "North"));
        assert_eq!(units[1], ExternalUnit::new(2, "South"));
    }

    #[test]
    fn test_serialize_uses_wire_field_names() {
        let json = serde_json::to_value(ExternalUnit::new(7, "West")).unwrap();
        assert_eq!(json, serde_json::json!({"id": 7, "name": "West"}));
    }
}
