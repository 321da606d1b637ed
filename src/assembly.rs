// Directory of the device's I/O assembly instances. The assembly data
// storage itself lives with the application; the core only needs to know
// which instances exist, their direction, and the index of each output
// among the outputs (the OCPUNID table is parallel to that order).

use thiserror::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AsmKind {
    Input,
    Output,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AsmEntry {
    pub instance: u16,
    pub kind: AsmKind,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AsmConfigError {
    #[error("duplicate assembly instance {0}")]
    DuplicateInstance(u16),
    #[error("assembly instance 0 is reserved")]
    NullInstance,
}

#[derive(Clone, Debug)]
pub struct Assemblies {
    entries: Vec<AsmEntry>,
}

impl Assemblies {
    pub fn new(entries: Vec<AsmEntry>) -> Result<Self, AsmConfigError> {
        for (i, e) in entries.iter().enumerate() {
            if e.instance == crate::cip::ASM_NULL_INSTANCE {
                return Err(AsmConfigError::NullInstance);
            }
            if entries[..i].iter().any(|p| p.instance == e.instance) {
                return Err(AsmConfigError::DuplicateInstance(e.instance));
            }
        }
        Ok(Assemblies { entries })
    }

    pub fn kind_of(&self, instance: u16) -> Option<AsmKind> {
        self.entries.iter().find(|e| e.instance == instance).map(|e| e.kind)
    }

    pub fn is_input(&self, instance: u16) -> bool {
        self.kind_of(instance) == Some(AsmKind::Input)
    }

    pub fn is_output(&self, instance: u16) -> bool {
        self.kind_of(instance) == Some(AsmKind::Output)
    }

    /// Index of an output instance among the outputs, in declaration order.
    pub fn out_index_from_instance(&self, instance: u16) -> Option<usize> {
        self.entries
            .iter()
            .filter(|e| e.kind == AsmKind::Output)
            .position(|e| e.instance == instance)
    }

    pub fn out_instances(&self) -> Vec<u16> {
        self.entries
            .iter()
            .filter(|e| e.kind == AsmKind::Output)
            .map(|e| e.instance)
            .collect()
    }

    pub fn out_count(&self) -> usize {
        self.entries.iter().filter(|e| e.kind == AsmKind::Output).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir() -> Assemblies {
        Assemblies::new(vec![
            AsmEntry { instance: 100, kind: AsmKind::Input },
            AsmEntry { instance: 101, kind: AsmKind::Output },
            AsmEntry { instance: 102, kind: AsmKind::Output },
        ])
        .unwrap()
    }

    #[test]
    fn lookup_by_instance() {
        let d = dir();
        assert!(d.is_input(100));
        assert!(d.is_output(101));
        assert!(!d.is_output(100));
        assert_eq!(d.kind_of(999), None);
    }

    #[test]
    fn output_indices_follow_declaration_order() {
        let d = dir();
        assert_eq!(d.out_index_from_instance(101), Some(0));
        assert_eq!(d.out_index_from_instance(102), Some(1));
        assert_eq!(d.out_index_from_instance(100), None);
        assert_eq!(d.out_instances(), vec![101, 102]);
        assert_eq!(d.out_count(), 2);
    }

    #[test]
    fn rejects_duplicates_and_null() {
        assert_eq!(
            Assemblies::new(vec![
                AsmEntry { instance: 7, kind: AsmKind::Input },
                AsmEntry { instance: 7, kind: AsmKind::Output },
            ])
            .unwrap_err(),
            AsmConfigError::DuplicateInstance(7)
        );
        assert_eq!(
            Assemblies::new(vec![AsmEntry { instance: 0, kind: AsmKind::Input }]).unwrap_err(),
            AsmConfigError::NullInstance
        );
    }
}
