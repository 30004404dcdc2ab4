use crate::language::ast::UnitKind;

pub struct EmbeddedUnit {
    pub name: &'static str,
    pub kind: UnitKind,
    pub file: &'static str,
    pub source: &'static str,
}

pub const STANDARD_LIBRARY: [EmbeddedUnit; 3] = [
    EmbeddedUnit {
        name: "FortressBuiltin",
        kind: UnitKind::Api,
        file: "FortressBuiltin.fsi",
        source: include_str!("../../library/FortressBuiltin.fsi"),
    },
    EmbeddedUnit {
        name: "FortressLibrary",
        kind: UnitKind::Api,
        file: "FortressLibrary.fsi",
        source: include_str!("../../library/FortressLibrary.fsi"),
    },
    EmbeddedUnit {
        name: "FortressLibrary",
        kind: UnitKind::Component,
        file: "FortressLibrary.fss",
        source: include_str!("../../library/FortressLibrary.fss"),
    },
];

pub fn embedded(name: &str, kind: UnitKind) -> Option<&'static EmbeddedUnit> {
    STANDARD_LIBRARY
        .iter()
        .find(|unit| unit.name == name && unit.kind == kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::parser::parse_unit;

    #[test]
    fn embedded_library_parses() {
        for unit in &STANDARD_LIBRARY {
            let parsed = parse_unit(None, unit.source)
                .unwrap_or_else(|errs| panic!("{}: {}", unit.file, errs.first_message()));
            assert_eq!(parsed.name, unit.name);
            assert_eq!(parsed.kind, unit.kind);
        }
        assert!(embedded("FortressBuiltin", UnitKind::Api)
            .map(|unit| unit.source.contains("native api"))
            .unwrap_or(false));
        assert!(embedded("FortressBuiltin", UnitKind::Component).is_none());
    }
}
