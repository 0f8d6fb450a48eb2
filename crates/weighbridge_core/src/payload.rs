//! Corpo JSON enviado ao endpoint remoto para cada leitura.
//!
//! Dois formatos, escolhidos no `config.toml`:
//! - `simple`: `{weighbridge, weight, status, time}`
//! - `dataverse`: linha OData com bind para a tabela de balanças

use crate::types::{WeighStatus, WeightReading};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Formato do corpo de envio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    #[default]
    Simple,
    Dataverse,
}

/// Valor base da enumeração de status no Dataverse.
pub const DATAVERSE_STATUS_BASE: i64 = 198_320_000;

/// Status como opção do Dataverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum DataverseStatus {
    Unknown = DATAVERSE_STATUS_BASE,
    Gross,
    Net,
    Under,
    Over,
    Motion,
    Error,
}

impl From<WeighStatus> for DataverseStatus {
    fn from(status: WeighStatus) -> Self {
        match status {
            WeighStatus::Gross => Self::Gross,
            WeighStatus::Net => Self::Net,
            WeighStatus::Under => Self::Under,
            WeighStatus::Over => Self::Over,
            WeighStatus::Motion => Self::Motion,
            WeighStatus::Error => Self::Error,
            WeighStatus::Blank | WeighStatus::Other(_) => Self::Unknown,
        }
    }
}

/// Identificação da balança no formato Dataverse.
#[derive(Debug, Clone, Copy)]
pub struct DataverseTarget<'a> {
    /// Prefixo do ambiente (ex: `cr4a1`)
    pub environment: &'a str,
    /// Nome da tabela de balanças, sem prefixo
    pub table: &'a str,
    /// GUID da linha da balança
    pub guid: &'a str,
}

/// Formato ISO-8601 usado nos dois payloads (`2024-05-01T12:30:00Z`).
pub fn format_time(reading: &WeightReading) -> String {
    reading
        .captured_at
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Payload `simple`.
pub fn simple_payload(reading: &WeightReading, device_name: &str) -> Value {
    json!({
        "weighbridge": device_name,
        "weight": reading.weight,
        "status": reading.status.code().to_string(),
        "time": format_time(reading),
    })
}

/// Payload `dataverse`.
pub fn dataverse_payload(reading: &WeightReading, target: DataverseTarget<'_>) -> Value {
    let env = target.environment;
    let mut row = Map::new();
    row.insert(
        format!("{env}_Weighbridge@odata.bind"),
        Value::String(format!("{env}_{}({})", target.table, target.guid)),
    );
    row.insert(
        format!("{env}_weighbridgestatus"),
        json!(DataverseStatus::from(reading.status) as i64),
    );
    row.insert(format!("{env}_enteredtime"), Value::String(format_time(reading)));
    row.insert(format!("{env}_weight"), json!(reading.weight));
    Value::Object(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn reading(status: WeighStatus) -> WeightReading {
        WeightReading {
            weight: 120.0,
            status,
            captured_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
        }
    }

    #[test]
    fn simple_payload_shape() {
        let body = simple_payload(&reading(WeighStatus::Gross), "Ponte 1");
        assert_eq!(body["weighbridge"], "Ponte 1");
        assert_eq!(body["weight"], 120.0);
        assert_eq!(body["status"], "G");
        assert_eq!(body["time"], "2024-05-01T12:30:00Z");
    }

    #[test]
    fn dataverse_payload_shape() {
        let target = DataverseTarget {
            environment: "cr4a1",
            table: "weighbridges",
            guid: "0b1c2d3e-0000-0000-0000-000000000001",
        };
        let body = dataverse_payload(&reading(WeighStatus::Net), target);
        let row = body.as_object().unwrap();
        assert_eq!(row.len(), 4);
        assert_eq!(
            row["cr4a1_Weighbridge@odata.bind"],
            "cr4a1_weighbridges(0b1c2d3e-0000-0000-0000-000000000001)"
        );
        assert_eq!(row["cr4a1_weighbridgestatus"], 198_320_002);
        assert_eq!(row["cr4a1_enteredtime"], "2024-05-01T12:30:00Z");
        assert_eq!(row["cr4a1_weight"], 120.0);
    }

    #[test]
    fn dataverse_status_enumeration() {
        let cases = [
            (WeighStatus::Blank, 198_320_000),
            (WeighStatus::Gross, 198_320_001),
            (WeighStatus::Net, 198_320_002),
            (WeighStatus::Under, 198_320_003),
            (WeighStatus::Over, 198_320_004),
            (WeighStatus::Motion, 198_320_005),
            (WeighStatus::Error, 198_320_006),
            (WeighStatus::Other('#'), 198_320_000),
        ];
        for (status, expected) in cases {
            assert_eq!(DataverseStatus::from(status) as i64, expected, "{status:?}");
        }
    }
}
