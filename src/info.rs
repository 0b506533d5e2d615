//! Build-Info records: what a node and its inputs looked like the last time
//! it was built.

use crate::sig::Digest;

/// A node's own signature fields.  Kept deliberately flat so the persisted
/// form stays stable.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeInfo {
    pub csig: Option<Digest>,
    /// Modification time, in nanoseconds since the epoch.
    pub timestamp: Option<u64>,
    pub size: Option<u64>,
    pub bsig: Option<Digest>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Field {
    Csig,
    Timestamp,
    Size,
    Bsig,
}

impl Field {
    pub const ALL: [Field; 4] = [Field::Csig, Field::Timestamp, Field::Size, Field::Bsig];
}

impl NodeInfo {
    /// Overlay every field set on `other` onto self.
    pub fn merge(&mut self, other: &NodeInfo) {
        if other.csig.is_some() {
            self.csig = other.csig;
        }
        if other.timestamp.is_some() {
            self.timestamp = other.timestamp;
        }
        if other.size.is_some() {
            self.size = other.size;
        }
        if other.bsig.is_some() {
            self.bsig = other.bsig;
        }
    }

    pub fn field(&self, field: Field) -> Option<String> {
        match field {
            Field::Csig => self.csig.map(|d| d.to_hex()),
            Field::Timestamp => self.timestamp.map(|t| t.to_string()),
            Field::Size => self.size.map(|s| s.to_string()),
            Field::Bsig => self.bsig.map(|d| d.to_hex()),
        }
    }

    /// Render the fields that are set, space separated.
    pub fn format(&self) -> String {
        Field::ALL
            .iter()
            .filter_map(|&f| self.field(f))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Render a chosen list of fields; unset ones show as "None".
    pub fn format_fields(&self, fields: &[Field]) -> String {
        fields
            .iter()
            .map(|&f| self.field(f).unwrap_or_else(|| "None".to_owned()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// The persisted record for a built node: its own info plus, for each kind
/// of input, which inputs were used and their signatures at the time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildInfo {
    pub ninfo: NodeInfo,
    pub bsources: Option<Vec<String>>,
    pub bsourcesigs: Option<Vec<NodeInfo>>,
    pub bdepends: Option<Vec<String>>,
    pub bdependsigs: Option<Vec<NodeInfo>>,
    pub bimplicit: Option<Vec<String>>,
    pub bimplicitsigs: Option<Vec<NodeInfo>>,
    /// The action's contents, and their digest.
    pub bact: Option<String>,
    pub bactsig: Option<Digest>,
}

fn overlay<T: Clone>(dst: &mut Option<T>, src: &Option<T>) {
    if src.is_some() {
        dst.clone_from(src);
    }
}

impl BuildInfo {
    /// Overlay every field set on `other` onto self; `ninfo` merges
    /// field by field.
    pub fn merge(&mut self, other: &BuildInfo) {
        self.ninfo.merge(&other.ninfo);
        overlay(&mut self.bsources, &other.bsources);
        overlay(&mut self.bsourcesigs, &other.bsourcesigs);
        overlay(&mut self.bdepends, &other.bdepends);
        overlay(&mut self.bdependsigs, &other.bdependsigs);
        overlay(&mut self.bimplicit, &other.bimplicit);
        overlay(&mut self.bimplicitsigs, &other.bimplicitsigs);
        overlay(&mut self.bact, &other.bact);
        overlay(&mut self.bactsig, &other.bactsig);
    }

    /// The recorded (names, sigs) for sources, depends and implicit, in
    /// that order.  Absent lists read as empty.
    pub fn dep_lists(&self) -> [(&[String], &[NodeInfo]); 3] {
        fn pair<'a>(
            names: &'a Option<Vec<String>>,
            sigs: &'a Option<Vec<NodeInfo>>,
        ) -> (&'a [String], &'a [NodeInfo]) {
            (
                names.as_deref().unwrap_or(&[]),
                sigs.as_deref().unwrap_or(&[]),
            )
        }
        [
            pair(&self.bsources, &self.bsourcesigs),
            pair(&self.bdepends, &self.bdependsigs),
            pair(&self.bimplicit, &self.bimplicitsigs),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_info_eq() {
        let mut a = NodeInfo::default();
        let mut b = NodeInfo::default();
        assert_eq!(a, b);
        a.size = Some(777);
        assert_ne!(a, b);
        b.size = Some(888);
        assert_ne!(a, b);
        a.size = Some(888);
        assert_eq!(a, b);
    }

    #[test]
    fn node_info_merge() {
        let mut a = NodeInfo {
            timestamp: Some(1),
            size: Some(2),
            ..Default::default()
        };
        let b = NodeInfo {
            size: Some(222),
            bsig: Some(Digest::of(b"333")),
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(
            a,
            NodeInfo {
                csig: None,
                timestamp: Some(1),
                size: Some(222),
                bsig: Some(Digest::of(b"333")),
            }
        );
    }

    #[test]
    fn format() {
        let info = NodeInfo {
            timestamp: Some(10),
            size: Some(20),
            ..Default::default()
        };
        assert_eq!(info.format(), "10 20");
        assert_eq!(
            info.format_fields(&[Field::Timestamp, Field::Size, Field::Csig]),
            "10 20 None"
        );
        assert_eq!(NodeInfo::default().format(), "");
    }

    #[test]
    fn build_info_eq_is_field_wise() {
        let mut a = BuildInfo::default();
        let mut b = BuildInfo::default();
        assert_eq!(a, b);
        a.ninfo.size = Some(777);
        assert_ne!(a, b);
        b.ninfo.size = Some(777);
        assert_eq!(a, b);
        a.bsources = Some(vec!["x".to_owned()]);
        assert_ne!(a, b);
    }

    #[test]
    fn build_info_merge_law() {
        let mut a = BuildInfo {
            bsources: Some(vec!["a1".to_owned()]),
            bdepends: Some(vec!["a2".to_owned()]),
            ninfo: NodeInfo {
                timestamp: Some(4),
                size: Some(5),
                ..Default::default()
            },
            ..Default::default()
        };
        let b = BuildInfo {
            bdepends: Some(vec!["b2".to_owned()]),
            bact: Some("b3".to_owned()),
            ninfo: NodeInfo {
                size: Some(555),
                bsig: Some(Digest::of(b"666")),
                ..Default::default()
            },
            ..Default::default()
        };
        let orig = a.clone();
        a.merge(&b);
        assert_eq!(a.bsources, orig.bsources);
        assert_eq!(a.bdepends, b.bdepends);
        assert_eq!(a.bact, b.bact);
        assert_eq!(a.bimplicit, None);
        assert_eq!(a.ninfo.timestamp, Some(4));
        assert_eq!(a.ninfo.size, Some(555));
        assert_eq!(a.ninfo.bsig, b.ninfo.bsig);
    }

    #[test]
    fn dep_lists_default_empty() {
        let info = BuildInfo {
            bimplicit: Some(vec!["h".to_owned()]),
            bimplicitsigs: Some(vec![NodeInfo::default()]),
            ..Default::default()
        };
        let [sources, depends, implicit] = info.dep_lists();
        assert!(sources.0.is_empty() && sources.1.is_empty());
        assert!(depends.0.is_empty());
        assert_eq!(implicit.0, &["h".to_owned()][..]);
        assert_eq!(implicit.1.len(), 1);
    }
}
