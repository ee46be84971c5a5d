//! Type representation for declarations and expression lowering.
//!
//! Types are fully syntactic: what was declared is what the symbol table
//! lays out, and the code generator selects opcode widths from the resolved
//! type. Sizes are VM bytes, not host bytes.

/// Default capacity of a STRING variable (bytes of content, not counting
/// the 4-byte header or the null terminator).
pub const STRING_DEFAULT_CAPACITY: u32 = 80;

/// Byte size of a narrow string variable: `[len:2][cap:2][bytes:cap+1]`.
pub const STRING_VAR_SIZE: u32 = 4 + STRING_DEFAULT_CAPACITY + 1;
/// Wide variant: header plus 2-byte code units.
pub const WSTRING_VAR_SIZE: u32 = 4 + (STRING_DEFAULT_CAPACITY + 1) * 2;

/// The elementary (non-composite) types of the language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementaryType {
    Bool,
    SInt,
    USInt,
    Int,
    UInt,
    DInt,
    UDInt,
    LInt,
    ULInt,
    Real,
    LReal,
    Time,
    Date,
    Tod,
    Dt,
    Str,
    WStr,
}

impl ElementaryType {
    pub fn from_name(name: &str) -> Option<ElementaryType> {
        Some(match name {
            "BOOL" => ElementaryType::Bool,
            "SINT" => ElementaryType::SInt,
            "USINT" => ElementaryType::USInt,
            "INT" => ElementaryType::Int,
            "UINT" => ElementaryType::UInt,
            "DINT" => ElementaryType::DInt,
            "UDINT" => ElementaryType::UDInt,
            "LINT" => ElementaryType::LInt,
            "ULINT" => ElementaryType::ULInt,
            "REAL" => ElementaryType::Real,
            "LREAL" => ElementaryType::LReal,
            "TIME" => ElementaryType::Time,
            "DATE" => ElementaryType::Date,
            "TOD" => ElementaryType::Tod,
            "DT" => ElementaryType::Dt,
            "STRING" => ElementaryType::Str,
            "WSTRING" => ElementaryType::WStr,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementaryType::Bool => "BOOL",
            ElementaryType::SInt => "SINT",
            ElementaryType::USInt => "USINT",
            ElementaryType::Int => "INT",
            ElementaryType::UInt => "UINT",
            ElementaryType::DInt => "DINT",
            ElementaryType::UDInt => "UDINT",
            ElementaryType::LInt => "LINT",
            ElementaryType::ULInt => "ULINT",
            ElementaryType::Real => "REAL",
            ElementaryType::LReal => "LREAL",
            ElementaryType::Time => "TIME",
            ElementaryType::Date => "DATE",
            ElementaryType::Tod => "TOD",
            ElementaryType::Dt => "DT",
            ElementaryType::Str => "STRING",
            ElementaryType::WStr => "WSTRING",
        }
    }

    pub fn size(self) -> u32 {
        match self {
            ElementaryType::Bool | ElementaryType::SInt | ElementaryType::USInt => 1,
            ElementaryType::Int | ElementaryType::UInt => 2,
            ElementaryType::DInt
            | ElementaryType::UDInt
            | ElementaryType::Real
            | ElementaryType::Time
            | ElementaryType::Date
            | ElementaryType::Tod
            | ElementaryType::Dt => 4,
            ElementaryType::LInt | ElementaryType::ULInt | ElementaryType::LReal => 8,
            ElementaryType::Str => STRING_VAR_SIZE,
            ElementaryType::WStr => WSTRING_VAR_SIZE,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ElementaryType::Real | ElementaryType::LReal)
    }

    /// Integer-class types, including the time/date family which the VM
    /// stores as plain integer counts.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ElementaryType::SInt
                | ElementaryType::USInt
                | ElementaryType::Int
                | ElementaryType::UInt
                | ElementaryType::DInt
                | ElementaryType::UDInt
                | ElementaryType::LInt
                | ElementaryType::ULInt
                | ElementaryType::Time
                | ElementaryType::Date
                | ElementaryType::Tod
                | ElementaryType::Dt
        )
    }

    pub fn is_string(self) -> bool {
        matches!(self, ElementaryType::Str | ElementaryType::WStr)
    }
}

/// A declared type: elementary tag, array, pointer, or the name of a
/// user-defined or stdlib composite resolved later by the symbol table.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Elementary(ElementaryType),
    Array {
        element: Box<Type>,
        /// 1–3 dimensions, each `(lower, upper)` inclusive.
        dims: Vec<(i64, i64)>,
    },
    Pointer(Box<Type>),
    Named(String),
}

impl Type {
    pub const BOOL: Type = Type::Elementary(ElementaryType::Bool);
    pub const INT: Type = Type::Elementary(ElementaryType::Int);
    pub const DINT: Type = Type::Elementary(ElementaryType::DInt);
    pub const REAL: Type = Type::Elementary(ElementaryType::Real);
    pub const TIME: Type = Type::Elementary(ElementaryType::Time);
    pub const STRING: Type = Type::Elementary(ElementaryType::Str);

    pub fn elementary(&self) -> Option<ElementaryType> {
        match self {
            Type::Elementary(e) => Some(*e),
            _ => None,
        }
    }

    pub fn is_float(&self) -> bool {
        self.elementary().is_some_and(ElementaryType::is_float)
    }

    pub fn is_string(&self) -> bool {
        self.elementary().is_some_and(ElementaryType::is_string)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Type::Elementary(ElementaryType::Bool))
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Elementary(e) => write!(f, "{}", e.name()),
            Type::Array { element, dims } => {
                write!(f, "ARRAY[")?;
                for (i, (lo, hi)) in dims.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}..{}", lo, hi)?;
                }
                write!(f, "] OF {}", element)
            }
            Type::Pointer(inner) => write!(f, "REF_TO {}", inner),
            Type::Named(name) => write!(f, "{}", name),
        }
    }
}

/// Alignment for a symbol or member of the given size: `min(size, 4)`,
/// clamped down to a power of two.
pub fn alignment_of(size: u32) -> u32 {
    match size {
        0 | 1 => 1,
        2 | 3 => 2,
        _ => 4,
    }
}

/// Round `offset` up to `align`.
pub fn align_up(offset: u32, align: u32) -> u32 {
    debug_assert!(align.is_power_of_two());
    (offset + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elementary_sizes() {
        assert_eq!(ElementaryType::Bool.size(), 1);
        assert_eq!(ElementaryType::Int.size(), 2);
        assert_eq!(ElementaryType::DInt.size(), 4);
        assert_eq!(ElementaryType::LReal.size(), 8);
        assert_eq!(ElementaryType::Str.size(), 85);
        assert_eq!(ElementaryType::WStr.size(), 166);
    }

    #[test]
    fn test_name_round_trip() {
        for name in ["BOOL", "INT", "UDINT", "LREAL", "TIME", "WSTRING"] {
            let ty = ElementaryType::from_name(name).unwrap();
            assert_eq!(ty.name(), name);
        }
        assert!(ElementaryType::from_name("WORD").is_none());
    }

    #[test]
    fn test_alignment() {
        assert_eq!(alignment_of(1), 1);
        assert_eq!(alignment_of(2), 2);
        assert_eq!(alignment_of(4), 4);
        assert_eq!(alignment_of(85), 4);
        assert_eq!(align_up(5, 4), 8);
        assert_eq!(align_up(8, 4), 8);
    }

    #[test]
    fn test_display() {
        let ty = Type::Array {
            element: Box::new(Type::INT),
            dims: vec![(1, 10), (0, 2)],
        };
        assert_eq!(ty.to_string(), "ARRAY[1..10,0..2] OF INT");
        assert_eq!(Type::Pointer(Box::new(Type::REAL)).to_string(), "REF_TO REAL");
    }
}
