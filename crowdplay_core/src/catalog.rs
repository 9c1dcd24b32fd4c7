//! Static catalog of playable environments.

use crowdplay_env::{EmulatorFactory, EnvError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Ticks advanced when generating a missing default checkpoint.
pub const DEFAULT_WARMUP_TICKS: u32 = 2000;

/// A named, immutable simulation definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// Lookup key (stored lower-case)
    pub name: String,

    /// ROM image handed to the emulator factory
    pub rom: PathBuf,

    /// State blob every fresh session starts from
    pub default_checkpoint: PathBuf,

    /// Emulator steps per voting round
    pub ticks_per_round: u32,

    /// Per-environment override of the idle threshold (in poll ticks)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_expiry_polls: Option<u32>,
}

impl Environment {
    /// Creates an environment with no idle override.
    pub fn new(
        name: &str,
        rom: impl Into<PathBuf>,
        default_checkpoint: impl Into<PathBuf>,
        ticks_per_round: u32,
    ) -> Self {
        Self {
            name: name.to_lowercase(),
            rom: rom.into(),
            default_checkpoint: default_checkpoint.into(),
            ticks_per_round,
            idle_expiry_polls: None,
        }
    }

    /// Reads the default checkpoint blob from disk.
    pub fn read_default_checkpoint(&self) -> std::io::Result<Vec<u8>> {
        std::fs::read(&self.default_checkpoint)
    }
}

/// Ordered collection of environments, looked up by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    environments: Vec<Environment>,
}

impl Catalog {
    /// Creates a catalog from a list of environments (order is kept).
    pub fn new(environments: Vec<Environment>) -> Self {
        Self { environments }
    }

    /// The catalog shipped with the bot.
    pub fn builtin() -> Self {
        Self::new(vec![
            // Pokemon
            Environment::new("pkm_red", "roms/red.gb", "roms/red.sv", 120),
            Environment::new("pkm_blue", "roms/blue.gb", "roms/blue.sv", 120),
            Environment::new("pkm_yellow", "roms/yellow.gbc", "roms/yellow.sv", 120),
            Environment::new("pkm_silver", "roms/silver.gbc", "roms/silver.sv", 120),
            Environment::new("pkm_gold", "roms/gold.gbc", "roms/gold.sv", 120),
            Environment::new("dragon_quest", "roms/quest.gbc", "roms/quest.sv", 120),
            Environment::new("tetris", "roms/tetris.gb", "roms/tetris.sv", 60),
            Environment::new("frogger", "roms/frogger.gbc", "roms/frogger.sv", 60),
            Environment::new("harvest_moon", "roms/harvest2.gbc", "roms/harvest2.sv", 150),
            Environment::new("dr_mario", "roms/dr_mario.gb", "roms/dr_mario.sv", 60),
        ])
    }

    /// Looks up an environment by name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&Environment> {
        let name = name.to_lowercase();
        self.environments.iter().find(|e| e.name == name)
    }

    /// Environments in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Environment> {
        self.environments.iter()
    }

    /// Returns the number of environments.
    pub fn len(&self) -> usize {
        self.environments.len()
    }

    /// Returns true if the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.environments.is_empty()
    }

    /// Rewrites relative ROM and checkpoint paths against `root`.
    pub fn rooted_at(mut self, root: &Path) -> Self {
        for env in &mut self.environments {
            if env.rom.is_relative() {
                env.rom = root.join(&env.rom);
            }
            if env.default_checkpoint.is_relative() {
                env.default_checkpoint = root.join(&env.default_checkpoint);
            }
        }
        self
    }

    /// Generates every missing default checkpoint.
    ///
    /// Boots the ROM headless, advances `warmup_ticks` steps past the boot
    /// sequence and writes the resulting state. Existing files are left
    /// alone. Returns the names of the environments that were primed.
    pub fn prime_default_checkpoints(
        &self,
        factory: &dyn EmulatorFactory,
        warmup_ticks: u32,
    ) -> Result<Vec<String>, EnvError> {
        let mut primed = Vec::new();

        for env in &self.environments {
            if env.default_checkpoint.exists() {
                debug!(env = %env.name, "default checkpoint present");
                continue;
            }

            let mut engine = factory.launch(&env.rom)?;
            engine.set_realtime_throttle(false);
            for _ in 0..warmup_ticks {
                engine.advance()?;
            }
            let blob = engine.serialize_state()?;

            if let Some(parent) = env.default_checkpoint.parent() {
                std::fs::create_dir_all(parent).map_err(|e| EnvError::engine(e.to_string()))?;
            }
            std::fs::write(&env.default_checkpoint, blob)
                .map_err(|e| EnvError::engine(e.to_string()))?;

            info!(env = %env.name, path = %env.default_checkpoint.display(), "primed default checkpoint");
            primed.push(env.name.clone());
        }

        Ok(primed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog() {
        let catalog = Catalog::builtin();
        assert_eq!(catalog.len(), 10);
        assert_eq!(catalog.get("tetris").unwrap().ticks_per_round, 60);
        assert_eq!(catalog.get("harvest_moon").unwrap().ticks_per_round, 150);
        assert_eq!(catalog.iter().next().unwrap().name, "pkm_red");
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let catalog = Catalog::builtin();
        assert!(catalog.get("PKM_RED").is_some());
        assert!(catalog.get("Tetris").is_some());
        assert!(catalog.get("zelda").is_none());
    }

    #[test]
    fn test_rooted_at_keeps_absolute_paths() {
        let catalog = Catalog::new(vec![
            Environment::new("a", "roms/a.gb", "/abs/a.sv", 60),
        ])
        .rooted_at(Path::new("/srv/crowdplay"));

        let env = catalog.get("a").unwrap();
        assert_eq!(env.rom, PathBuf::from("/srv/crowdplay/roms/a.gb"));
        assert_eq!(env.default_checkpoint, PathBuf::from("/abs/a.sv"));
    }

    #[test]
    fn test_catalog_json_roundtrip_with_idle_override() {
        let json = r#"{"environments":[
            {"name":"tetris","rom":"roms/tetris.gb","default_checkpoint":"roms/tetris.sv","ticks_per_round":60,"idle_expiry_polls":10}
        ]}"#;
        let catalog: Catalog = serde_json::from_str(json).unwrap();
        assert_eq!(catalog.get("tetris").unwrap().idle_expiry_polls, Some(10));
    }
}
