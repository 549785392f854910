//! Stock acknowledgements worth storing from their first use

/// Short confirmations a ship assistant says over and over.
///
/// Pass as `pre_seeded_phrases` or to [`crate::ResponseCache::warm`].
pub const COMMON_ACTION_RESPONSES: &[&str] = &[
    // Hardpoints
    "Hardpoints deployed",
    "Hardpoints deployed, Commander",
    "Hardpoints retracted",
    // Speed
    "Setting speed to zero",
    "Setting speed to 50 percent",
    "Setting speed to 75 percent",
    "Setting speed to 100 percent",
    // Shields
    "Shields up",
    "Shield cell bank deployed",
    // Cargo
    "Cargo scoop deployed",
    "Cargo scoop retracted",
    // Landing gear
    "Landing gear down",
    "Landing gear up",
    // FSD
    "Frameshift drive charging",
    "Jump complete",
    "Hyperspace jump complete",
    // Lights
    "Lights on",
    "Lights off",
    // Acknowledgements
    "Understood",
    "Affirmative",
    "Copy that",
    "Negative",
];
