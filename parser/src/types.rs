use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// Per-replay network identifier of a game object (champion, minion, ward...).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u32);

impl EntityId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for EntityId {
    fn from(v: u32) -> Self {
        EntityId(v)
    }
}

/// The two sides of a match. The stats blob encodes them as "100" and "200".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
pub enum Team {
    Blue,
    Red,
}

impl Team {
    pub const BLUE_CODE: &'static str = "100";
    pub const RED_CODE: &'static str = "200";

    /// Anything other than the blue side code is treated as red.
    pub fn from_code(code: &str) -> Self {
        if code == Self::BLUE_CODE {
            Team::Blue
        } else {
            Team::Red
        }
    }

    pub fn opponent(self) -> Self {
        match self {
            Team::Blue => Team::Red,
            Team::Red => Team::Blue,
        }
    }
}

/// Lane assignment, inferred from the player's slot in the stats list.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
pub enum Role {
    Top,
    Jungle,
    Mid,
    Adc,
    Support,
}

impl Role {
    pub const ROTATION: [Role; 5] = [Role::Top, Role::Jungle, Role::Mid, Role::Adc, Role::Support];

    /// Stats are assumed to list each team in Top/Jungle/Mid/Adc/Support order.
    pub fn from_slot(index: usize) -> Self {
        Self::ROTATION[index % Self::ROTATION.len()]
    }
}

/// World-space position on the map plane.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapPos {
    pub x: f32,
    pub y: f32,
}

impl MapPos {
    pub fn new(x: f32, y: f32) -> Self {
        MapPos { x, y }
    }

    pub fn distance(self, other: MapPos) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn lerp(self, other: MapPos, t: f32) -> MapPos {
        MapPos {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }
}

impl fmt::Display for MapPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1}, {:.1})", self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn team_codes() {
        assert_eq!(Team::from_code("100"), Team::Blue);
        assert_eq!(Team::from_code("200"), Team::Red);
        assert_eq!(Team::from_code(""), Team::Red);
        assert_eq!(Team::Blue.opponent(), Team::Red);
    }

    #[test]
    fn role_rotation_wraps_per_team() {
        let roles: Vec<Role> = (0..10).map(Role::from_slot).collect();
        assert_eq!(&roles[..5], &Role::ROTATION);
        assert_eq!(&roles[5..], &Role::ROTATION);
        assert_eq!(Role::iter().count(), 5);
        assert_eq!(Role::from_str("Adc").unwrap(), Role::Adc);
        assert_eq!(Role::Support.to_string(), "Support");
    }

    #[test]
    fn map_pos_lerp() {
        let a = MapPos::new(0.0, 0.0);
        let b = MapPos::new(30.0, 40.0);
        assert_eq!(a.distance(b), 50.0);
        assert_eq!(a.lerp(b, 0.5), MapPos::new(15.0, 20.0));
    }
}
