// SPDX-License-Identifier: MIT
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::{
    fs::{self, File},
    io::{BufReader, Write},
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

use crate::{
    output::write_atomic,
    patcher::{patch_file, SubstitutionRule},
};

/// Directory of the config files within the firmware tree
pub static CFG_DIR: &str = "res/cfg";
/// Config files holding the firmware information, one per display resolution
pub static INFO_CONFIGS: [&str; 2] = ["220x176.cfg", "320x240.cfg"];
/// Config file holding the menu defaults and feature switches
pub static MENU_CONFIG: &str = "menu.cfg";
/// Directory of the kernel modules within the firmware tree
pub static MODULES_DIR: &str = "vendor/modules";
/// Prefixes of drivers for sensors the camera does not have
pub static DEBLOAT_DRIVERS: [&str; 2] = ["mma", "bma"];
/// Menu entries of features the camera does not have
pub static DEBLOAT_SECTIONS: [&str; 2] = ["gsensor", "park_mode"];
/// Default name of the mksquashfs exclude list
pub static DEFAULT_EXCLUDE_LIST: &str = ".mksquashfs_exclude";
/// Name of the unpacked firmware tree as written by unsquashfs
pub static FIRMWARE_ROOT: &str = "squashfs-root";

/// Firmware information written into every build.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct BuildSettings {
    /// Version used in the image name (eg. 1.2)
    pub version: String,
    /// Shown as software version on the device
    pub build_number: String,
    pub product_type: String,
    pub manufacturer: String,
}

impl BuildSettings {
    /// Ensure all settings are given.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("version", &self.version),
            ("build number", &self.build_number),
            ("product type", &self.product_type),
            ("manufacturer", &self.manufacturer),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow!("Missing build setting: {name}."));
            }
        }

        Ok(())
    }

    /// Rules for the firmware information, `date` formatted as YYYYMMDD.
    pub fn rules(&self, date: &str) -> Vec<SubstitutionRule> {
        vec![
            SubstitutionRule::field("product_type", &self.product_type),
            SubstitutionRule::field("software_version", &self.build_number),
            SubstitutionRule::field("updated", date),
            SubstitutionRule::field("Manufacturer", &self.manufacturer),
            SubstitutionRule::field("date_number", date),
        ]
    }
}

/// Access point provided by the camera.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct WifiSettings {
    pub ssid: String,
    pub password: String,
}

impl Default for WifiSettings {
    fn default() -> Self {
        Self {
            ssid: "Sports DV".to_string(),
            password: "12345678".to_string(),
        }
    }
}

impl WifiSettings {
    pub fn rules(&self) -> Vec<SubstitutionRule> {
        vec![
            SubstitutionRule::field("wifi_ssid", &self.ssid),
            SubstitutionRule::field("wifi_pwd", &self.password),
        ]
    }
}

/// Preselected menu entries, given as index into the menu.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct MenuSettings {
    /// 0 simplified chinese .. 2 english .. 9 spanish
    pub language: u32,
    /// 0 4K30 .. 6 720P30
    pub video_resolution: u32,
    /// 0 2M .. 4 16M
    pub photo_resolution: u32,
    /// 0 off .. 3 high
    pub gsensor: u32,
}

impl Default for MenuSettings {
    fn default() -> Self {
        Self {
            language: 2,
            video_resolution: 0,
            photo_resolution: 4,
            gsensor: 1,
        }
    }
}

impl MenuSettings {
    /// Ensure all entries exist within their menu.
    pub fn validate(&self) -> Result<()> {
        for (section, value, count) in self.entries() {
            if value >= count {
                return Err(anyhow!(
                    "Invalid {section} entry {value}, the menu has {count} entries."
                ));
            }
        }

        Ok(())
    }

    pub fn rules(&self) -> Vec<SubstitutionRule> {
        self.entries()
            .into_iter()
            .map(|(section, value, _)| SubstitutionRule::section_field(section, "current", value))
            .collect()
    }

    fn entries(&self) -> [(&'static str, u32, u32); 4] {
        [
            ("language", self.language, 10),
            ("video_resolution", self.video_resolution, 7),
            ("photo_resolution", self.photo_resolution, 5),
            ("gsensor", self.gsensor, 4),
        ]
    }
}

/// Feature switches of the menu.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeatureSwitches {
    pub power_on_record: bool,
    pub record_sound: bool,
    pub time_watermark: bool,
    pub wifi: bool,
}

impl Default for FeatureSwitches {
    fn default() -> Self {
        Self {
            power_on_record: false,
            record_sound: true,
            time_watermark: true,
            wifi: false,
        }
    }
}

impl FeatureSwitches {
    pub fn rules(&self) -> Vec<SubstitutionRule> {
        vec![
            SubstitutionRule::field("power_on_record", u8::from(self.power_on_record)),
            SubstitutionRule::field("record_sound", u8::from(self.record_sound)),
            SubstitutionRule::field("time_water_mark", u8::from(self.time_watermark)),
            SubstitutionRule::field("wifi", u8::from(self.wifi)),
        ]
    }
}

/// ROM customization profile.
///
/// All parts are optional, parts not given leave the firmware tree untouched.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Customization {
    pub build: Option<BuildSettings>,
    pub wifi: Option<WifiSettings>,
    pub menu: Option<MenuSettings>,
    pub switches: Option<FeatureSwitches>,
    /// Drop drivers and menu entries of features the camera does not have
    #[serde(default)]
    pub debloat: bool,
}

impl Customization {
    /// Create a new customization profile
    ///
    /// Creates and returns a new profile by parsing the given json file.
    ///
    /// # Error
    ///
    /// Returns an error variant if reading or parsing of the specified
    /// file fails.
    pub fn new<P: AsRef<Path>>(profile: P) -> Result<Self> {
        let file = File::open(profile.as_ref()).with_context(|| {
            format!(
                "Failed to open customization profile {}.",
                profile.as_ref().display()
            )
        })?;
        let reader = BufReader::new(file);

        serde_json::from_reader(reader).with_context(|| {
            format!(
                "Failed to deserialize customization profile from {}.",
                profile.as_ref().display()
            )
        })
    }
}

/// Paths of the config files patched within a firmware tree.
pub fn info_config_paths<P: AsRef<Path>>(root: P) -> Vec<PathBuf> {
    INFO_CONFIGS
        .iter()
        .map(|name| root.as_ref().join(CFG_DIR).join(name))
        .collect()
}

pub fn menu_config_path<P: AsRef<Path>>(root: P) -> PathBuf {
    root.as_ref().join(CFG_DIR).join(MENU_CONFIG)
}

/// Rules disabling the menu entries of missing features.
pub fn debloat_rules() -> Vec<SubstitutionRule> {
    DEBLOAT_SECTIONS
        .iter()
        .map(|section| SubstitutionRule::section_field(*section, "count", 0))
        .collect()
}

/// Collect the paths to be left out of a debloated image.
///
/// Returns the kernel modules of the unused sensor drivers followed by
/// the entries of an optional user exclude list. Paths are relative to
/// the firmware tree, comments and empty lines of the user list are dropped.
pub fn debloat_exclusions<P: AsRef<Path>>(
    root: P,
    user_exclude: Option<&Path>,
) -> Result<Vec<String>> {
    let root = root.as_ref();
    let modules_dir = root.join(MODULES_DIR);
    let mut exclusions = Vec::new();

    for driver in DEBLOAT_DRIVERS {
        if !modules_dir.is_dir() {
            break;
        }

        for entry in WalkDir::new(&modules_dir).sort_by_file_name() {
            let entry = entry.context("Failed to scan the kernel modules.")?;

            if !entry.file_type().is_file()
                || !entry.file_name().to_string_lossy().starts_with(driver)
            {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(root)
                .context("Kernel module outside of the firmware tree.")?;
            exclusions.push(
                relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/"),
            );
        }
    }

    if let Some(user_exclude) = user_exclude {
        let content = fs::read_to_string(user_exclude)
            .with_context(|| format!("Failed to read {}.", user_exclude.display()))?;
        let prefix = format!("{FIRMWARE_ROOT}/");

        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            exclusions.push(line.strip_prefix(&prefix).unwrap_or(line).to_string());
        }
    }

    Ok(exclusions)
}

/// Request to customize an unpacked firmware tree.
pub struct CustomizeRequest<'a> {
    /// Unpacked firmware tree (squashfs-root)
    pub root: &'a Path,
    pub customization: &'a Customization,
    /// mksquashfs exclude list written when debloating
    pub exclude_list: &'a Path,
    /// Additional paths to exclude when debloating
    pub user_exclude: Option<&'a Path>,
}

/// Apply a customization profile to a firmware tree.
///
/// Config files missing in the tree are skipped. Without debloating a
/// stale exclude list is removed, so the next build contains everything.
pub fn apply_customization(request: &CustomizeRequest) -> Result<()> {
    let customization = request.customization;

    if let Some(menu) = &customization.menu {
        menu.validate()?;
    }

    if let Some(wifi) = &customization.wifi {
        log::info!("Updating WiFi settings.");
        let rules = wifi.rules();
        for path in info_config_paths(request.root) {
            patch_file(&path, &rules)?;
        }
    }

    let mut menu_rules = Vec::new();
    if let Some(menu) = &customization.menu {
        menu_rules.extend(menu.rules());
    }
    if let Some(switches) = &customization.switches {
        menu_rules.extend(switches.rules());
    }
    if !menu_rules.is_empty() {
        log::info!("Updating menu settings.");
        patch_file(menu_config_path(request.root), &menu_rules)?;
    }

    if customization.debloat {
        let exclusions = debloat_exclusions(request.root, request.user_exclude)?;

        log::info!(
            "Excluding {} paths, list written to {}.",
            exclusions.len(),
            request.exclude_list.display()
        );
        write_atomic(request.exclude_list, |writer: &mut dyn Write| {
            for path in &exclusions {
                writeln!(writer, "{path}")?;
            }
            Ok(())
        })?;

        patch_file(menu_config_path(request.root), &debloat_rules())?;
    } else if request.exclude_list.exists() {
        log::info!("Removing stale exclude list {}.", request.exclude_list.display());
        fs::remove_file(request.exclude_list).with_context(|| {
            format!("Failed to remove {}.", request.exclude_list.display())
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    static MENU_CFG: &str = "\
[language]
count=10
current=0
[video_resolution]
count=7
current=3
[photo_resolution]
count=5
current=0
[gsensor]
count=4
current=0
[park_mode]
count=2
current=1
[switch]
power_on_record=1
record_sound=0
time_water_mark=0
wifi=1
";

    static INFO_CFG: &str = "\
product_type=OLD
software_version=1
updated=20200101
Manufacturer=Nobody
date_number=20200101
wifi_ssid=Old
wifi_pwd=00000000
";

    fn firmware_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let cfg_dir = dir.path().join(CFG_DIR);
        fs::create_dir_all(&cfg_dir).unwrap();
        fs::write(cfg_dir.join("220x176.cfg"), INFO_CFG).unwrap();
        fs::write(cfg_dir.join(MENU_CONFIG), MENU_CFG).unwrap();

        let modules = dir.path().join(MODULES_DIR).join("sensors");
        fs::create_dir_all(&modules).unwrap();
        for module in ["bma250.ko", "mma8452.ko", "gc0308.ko", "mma7660.ko"] {
            fs::write(modules.join(module), b"ko").unwrap();
        }

        dir
    }

    #[test]
    fn test_load_profile() {
        let json = r#"
        {
            "build": {
                "version": "1.2",
                "build_number": "42",
                "product_type": "V3",
                "manufacturer": "ACME"
            },
            "menu": { "language": 6 },
            "debloat": true
        }"#;

        let customization: Customization = serde_json::from_str(json).unwrap();

        assert_eq!(customization.build.as_ref().unwrap().version, "1.2");
        assert_eq!(customization.wifi, None);
        assert_eq!(
            customization.menu,
            Some(MenuSettings {
                language: 6,
                ..MenuSettings::default()
            })
        );
        assert!(customization.debloat);
    }

    #[test]
    fn test_build_settings_validate() {
        let mut settings = BuildSettings {
            version: "1.0".to_string(),
            build_number: "1".to_string(),
            product_type: "V3".to_string(),
            manufacturer: "ACME".to_string(),
        };
        assert!(settings.validate().is_ok());

        settings.manufacturer = " ".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_menu_validate() {
        assert!(MenuSettings::default().validate().is_ok());

        let menu = MenuSettings {
            video_resolution: 7,
            ..MenuSettings::default()
        };
        assert!(menu.validate().is_err());
    }

    #[test]
    fn test_build_rules() {
        let settings = BuildSettings {
            version: "1.0".to_string(),
            build_number: "42".to_string(),
            product_type: "V3".to_string(),
            manufacturer: "ACME".to_string(),
        };

        let mut text = INFO_CFG.to_string();
        for rule in settings.rules("20261017") {
            text = rule.apply(&text);
        }

        assert!(text.starts_with(
            "product_type=V3\nsoftware_version=42\nupdated=20261017\nManufacturer=ACME\ndate_number=20261017\n"
        ));
        assert!(text.ends_with("wifi_ssid=Old\nwifi_pwd=00000000\n"));
    }

    #[test]
    fn test_apply_customization() {
        let tree = firmware_tree();
        let exclude_list = tree.path().join(DEFAULT_EXCLUDE_LIST);
        let customization = Customization {
            wifi: Some(WifiSettings {
                ssid: "Foo".to_string(),
                password: "bar".to_string(),
            }),
            menu: Some(MenuSettings::default()),
            switches: Some(FeatureSwitches::default()),
            ..Customization::default()
        };

        apply_customization(&CustomizeRequest {
            root: tree.path(),
            customization: &customization,
            exclude_list: &exclude_list,
            user_exclude: None,
        })
        .unwrap();

        let info = fs::read_to_string(tree.path().join(CFG_DIR).join("220x176.cfg")).unwrap();
        assert!(info.contains("\nwifi_ssid=Foo\nwifi_pwd=bar\n"));
        assert!(!tree.path().join(CFG_DIR).join("320x240.cfg").exists());

        let menu = fs::read_to_string(menu_config_path(tree.path())).unwrap();
        assert!(menu.contains("[language]\ncount=10\ncurrent=2\n"));
        assert!(menu.contains("[video_resolution]\ncount=7\ncurrent=0\n"));
        assert!(menu.contains("[photo_resolution]\ncount=5\ncurrent=4\n"));
        assert!(menu.contains("[gsensor]\ncount=4\ncurrent=1\n"));
        assert!(menu.contains("[park_mode]\ncount=2\ncurrent=1\n"));
        assert!(menu.ends_with("power_on_record=0\nrecord_sound=1\ntime_water_mark=1\nwifi=0\n"));
        assert!(!exclude_list.exists());
    }

    #[test]
    fn test_debloat() {
        let tree = firmware_tree();
        let exclude_list = tree.path().join(DEFAULT_EXCLUDE_LIST);
        let user_exclude = tree.path().join("exclude.txt");
        fs::write(
            &user_exclude,
            "# unused apps\n\nsquashfs-root/app/demo.apk\n  usr/share/sounds \n",
        )
        .unwrap();

        let customization = Customization {
            debloat: true,
            ..Customization::default()
        };

        apply_customization(&CustomizeRequest {
            root: tree.path(),
            customization: &customization,
            exclude_list: &exclude_list,
            user_exclude: Some(&user_exclude),
        })
        .unwrap();

        assert_eq!(
            fs::read_to_string(&exclude_list).unwrap(),
            "vendor/modules/sensors/mma7660.ko\n\
             vendor/modules/sensors/mma8452.ko\n\
             vendor/modules/sensors/bma250.ko\n\
             app/demo.apk\n\
             usr/share/sounds\n"
        );

        let menu = fs::read_to_string(menu_config_path(tree.path())).unwrap();
        assert!(menu.contains("[gsensor]\ncount=0\ncurrent=0\n"));
        assert!(menu.contains("[park_mode]\ncount=0\ncurrent=1\n"));
        assert!(menu.contains("[language]\ncount=10\ncurrent=0\n"));

        // Turning debloating off again removes the list
        apply_customization(&CustomizeRequest {
            root: tree.path(),
            customization: &Customization::default(),
            exclude_list: &exclude_list,
            user_exclude: None,
        })
        .unwrap();

        assert!(!exclude_list.exists());
    }
}
