use std::fmt;

/// Which livery file a watched source produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The car paint (`car_<id>.tga`, or `car_num_<id>.tga` with a custom number).
    Paint,
    /// The specular map (`car_spec_<id>.tga`).
    SpecMap,
}

impl Role {
    pub const ALL: [Self; 2] = [Self::Paint, Self::SpecMap];

    /// Short label used as the log prefix for this role.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Paint => "paint",
            Self::SpecMap => "spec",
        }
    }

    /// Infix between `car_` and the numeric id.
    pub const fn infix(self, custom_number: bool) -> &'static str {
        match self {
            Self::Paint if custom_number => "num_",
            Self::Paint => "",
            Self::SpecMap => "spec_",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infix() {
        assert_eq!(Role::Paint.infix(false), "");
        assert_eq!(Role::Paint.infix(true), "num_");
        assert_eq!(Role::SpecMap.infix(false), "spec_");
        // Custom numbers only apply to the paint
        assert_eq!(Role::SpecMap.infix(true), "spec_");
    }

    #[test]
    fn test_display_matches_label() {
        assert_eq!(Role::Paint.to_string(), "paint");
        assert_eq!(Role::SpecMap.to_string(), "spec");
    }
}
