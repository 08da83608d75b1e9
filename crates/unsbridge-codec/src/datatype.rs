use unsbridge_domain::LeafValue;

/// Sparkplug-B metric datatype byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DataType {
    Int8 = 1,
    Int16 = 2,
    Int32 = 3,
    Int64 = 4,
    UInt8 = 5,
    UInt16 = 6,
    UInt32 = 7,
    UInt64 = 8,
    Float = 9,
    Double = 10,
    Boolean = 11,
    String = 12,
    DateTime = 13,
    Text = 14,
    Uuid = 15,
    Bytes = 17,
}

impl DataType {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(v: u32) -> Option<DataType> {
        Some(match v {
            1 => DataType::Int8,
            2 => DataType::Int16,
            3 => DataType::Int32,
            4 => DataType::Int64,
            5 => DataType::UInt8,
            6 => DataType::UInt16,
            7 => DataType::UInt32,
            8 => DataType::UInt64,
            9 => DataType::Float,
            10 => DataType::Double,
            11 => DataType::Boolean,
            12 => DataType::String,
            13 => DataType::DateTime,
            14 => DataType::Text,
            15 => DataType::Uuid,
            17 => DataType::Bytes,
            _ => return None,
        })
    }

    /// Wire datatype for an XSD-style primitive type name. Falls back to the
    /// natural type of the value when the name is unknown.
    pub fn from_xsd(value_type: &str, value: &LeafValue) -> DataType {
        match value_type.trim_start_matches("xs:") {
            "byte" => DataType::Int8,
            "short" => DataType::Int16,
            "int" | "integer" => DataType::Int32,
            "long" => DataType::Int64,
            "unsignedByte" => DataType::UInt8,
            "unsignedShort" => DataType::UInt16,
            "unsignedInt" => DataType::UInt32,
            "unsignedLong" => DataType::UInt64,
            "float" => DataType::Float,
            "double" | "decimal" => DataType::Double,
            "boolean" => DataType::Boolean,
            "string" | "anyURI" => DataType::String,
            "dateTime" | "date" => DataType::DateTime,
            _ => DataType::of_value(value),
        }
    }

    /// The natural wire datatype of a leaf value.
    pub fn of_value(value: &LeafValue) -> DataType {
        match value {
            LeafValue::Null => DataType::String,
            LeafValue::Bool(_) => DataType::Boolean,
            LeafValue::Int(_) => DataType::Int64,
            LeafValue::Float(_) => DataType::Double,
            LeafValue::Text(_) => DataType::String,
            LeafValue::Bytes(_) => DataType::Bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_u32() {
        for dt in [
            DataType::Int8,
            DataType::Int64,
            DataType::Double,
            DataType::Boolean,
            DataType::String,
            DataType::Bytes,
        ] {
            assert_eq!(DataType::from_u32(dt.as_u32()), Some(dt));
        }
        assert_eq!(DataType::from_u32(0), None);
        assert_eq!(DataType::from_u32(16), None);
    }

    #[test]
    fn xsd_names_map_to_wire_types() {
        assert_eq!(
            DataType::from_xsd("xs:double", &LeafValue::Float(1.0)),
            DataType::Double
        );
        assert_eq!(
            DataType::from_xsd("xs:int", &LeafValue::Int(1)),
            DataType::Int32
        );
        // Unknown names fall back to the value's natural type.
        assert_eq!(
            DataType::from_xsd("xs:gYearMonth", &LeafValue::Text("2024-01".into())),
            DataType::String
        );
    }
}
