//! Core key types for graph variables.

/// Key of a time-indexed pose node.
///
/// PoseKeys are assigned sequentially by the symbol allocator, so a larger
/// key always means a later allocation (not necessarily a later timestamp).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PoseKey(pub u64);

impl PoseKey {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn index(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for PoseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "x{}", self.0)
    }
}

/// Key of a landmark node (plane, object, ...).
///
/// Landmarks are created by measurement producers for data association and
/// persist across observations; they have no timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LandmarkKey(pub u64);

impl LandmarkKey {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn index(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for LandmarkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "l{}", self.0)
    }
}

/// Any graph variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeKey {
    Pose(PoseKey),
    Landmark(LandmarkKey),
}

impl From<PoseKey> for NodeKey {
    fn from(key: PoseKey) -> Self {
        NodeKey::Pose(key)
    }
}

impl From<LandmarkKey> for NodeKey {
    fn from(key: LandmarkKey) -> Self {
        NodeKey::Landmark(key)
    }
}

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKey::Pose(k) => k.fmt(f),
            NodeKey::Landmark(k) => k.fmt(f),
        }
    }
}
