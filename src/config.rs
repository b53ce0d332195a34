//! INI configuration loading (spec §6.2). Parsing itself is handed off to
//! the `ini` crate; this module only knows the schema renderd expects.

use std::collections::BTreeMap;

use ini::Ini;

use crate::style::StyleConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read or parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: ini::Error,
    },
    #[error("section [{0}] is missing required key `{1}`")]
    MissingKey(String, &'static str),
    #[error("section [{0}] key `{1}` has an invalid value: {2}")]
    InvalidValue(String, &'static str, String),
    #[error("no [renderd] section and no active [renderd{0}] section found")]
    NoActiveRenderdSection(u32),
}

#[derive(Clone, Debug, Default)]
pub struct MapnikConfig {
    pub plugins_dir: String,
    pub font_dir: String,
    pub font_dir_recurse: bool,
}

#[derive(Clone, Debug)]
pub struct RenderdSection {
    pub socket_name: Option<String>,
    pub ip_hostname: Option<String>,
    pub ip_port: Option<u16>,
    pub num_threads: u32,
    pub tile_dir: String,
    pub stats_file: String,
    pub pid_file: String,
}

impl Default for RenderdSection {
    fn default() -> Self {
        RenderdSection {
            socket_name: Some("/run/renderd/renderd.sock".to_string()),
            ip_hostname: None,
            ip_port: None,
            num_threads: num_cpus_guess(),
            tile_dir: "/var/lib/mod_tile".to_string(),
            stats_file: "/var/run/renderd/renderd.stats".to_string(),
            pid_file: "/var/run/renderd.pid".to_string(),
        }
    }
}

fn num_cpus_guess() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(4)
}

/// Fully parsed configuration: the `[mapnik]` block, every `[renderd*]`
/// peer section keyed by slave index (0 = the section named `[renderd]`),
/// and every remaining section as a style.
#[derive(Clone, Debug)]
pub struct Config {
    pub mapnik: MapnikConfig,
    pub renderd: BTreeMap<u32, RenderdSection>,
    pub styles: BTreeMap<String, StyleConfig>,
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mapnik = parse_mapnik(ini);
        let renderd = parse_renderd_sections(ini);
        let styles = parse_style_sections(ini)?;

        Ok(Config {
            mapnik,
            renderd,
            styles,
        })
    }

    /// The active slave's section, selected by `--slave=N` (default 0).
    pub fn active_renderd(&self, slave: u32) -> Result<&RenderdSection, ConfigError> {
        self.renderd
            .get(&slave)
            .ok_or(ConfigError::NoActiveRenderdSection(slave))
    }
}

fn parse_mapnik(ini: &Ini) -> MapnikConfig {
    let section = ini.section(Some("mapnik"));
    MapnikConfig {
        plugins_dir: section
            .and_then(|s| s.get("plugins_dir"))
            .unwrap_or("")
            .to_string(),
        font_dir: section
            .and_then(|s| s.get("font_dir"))
            .unwrap_or("")
            .to_string(),
        font_dir_recurse: section
            .and_then(|s| s.get("font_dir_recurse"))
            .map(parse_bool)
            .unwrap_or(false),
    }
}

fn parse_renderd_sections(ini: &Ini) -> BTreeMap<u32, RenderdSection> {
    let mut out = BTreeMap::new();

    if let Some(section) = ini.section(Some("renderd")) {
        out.insert(0, renderd_from_section(section));
    }

    for n in 1..crate::slave::MAX_SLAVES as u32 {
        let name = format!("renderd{n}");
        if let Some(section) = ini.section(Some(name.as_str())) {
            out.insert(n, renderd_from_section(section));
        }
    }

    out
}

fn renderd_from_section(section: &ini::Properties) -> RenderdSection {
    let defaults = RenderdSection::default();
    RenderdSection {
        socket_name: section.get("socketname").map(str::to_string).or(defaults.socket_name),
        ip_hostname: section.get("iphostname").map(str::to_string),
        ip_port: section.get("ipport").and_then(|v| v.parse().ok()),
        num_threads: section
            .get("num_threads")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.num_threads),
        tile_dir: section
            .get("tile_dir")
            .map(str::to_string)
            .unwrap_or(defaults.tile_dir),
        stats_file: section
            .get("stats_file")
            .map(str::to_string)
            .unwrap_or(defaults.stats_file),
        pid_file: section
            .get("pid_file")
            .map(str::to_string)
            .unwrap_or(defaults.pid_file),
    }
}

fn parse_style_sections(ini: &Ini) -> Result<BTreeMap<String, StyleConfig>, ConfigError> {
    let mut out = BTreeMap::new();

    for (name, section) in ini.iter() {
        let Some(name) = name else { continue };
        if name == "mapnik" || name == "renderd" || is_renderd_n(name) {
            continue;
        }

        let xml = section
            .get("xml")
            .ok_or_else(|| ConfigError::MissingKey(name.to_string(), "xml"))?
            .to_string();
        let uri = section
            .get("uri")
            .ok_or_else(|| ConfigError::MissingKey(name.to_string(), "uri"))?
            .to_string();

        let (ext, mime_type, format) = match section.get("type") {
            Some(type_str) => parse_type_field(name, type_str)?,
            None => ("png".to_string(), "image/png".to_string(), "png256".to_string()),
        };

        let style = StyleConfig {
            name: name.to_string(),
            uri,
            xml,
            host: section.get("host").unwrap_or("").to_string(),
            htcphost: section.get("htcphost").map(str::to_string),
            tile_dir: section.get("tiledir").unwrap_or("").to_string(),
            tile_size: section
                .get("tilesize")
                .and_then(|v| v.parse().ok())
                .unwrap_or(256),
            scale: section
                .get("scale")
                .and_then(|v| v.parse().ok())
                .unwrap_or(1.0),
            minzoom: section
                .get("minzoom")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            maxzoom: section
                .get("maxzoom")
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            parameterize_style: section.get("parameterize_style").map(str::to_string),
            ext,
            mime_type,
            format,
        };

        if !(0.1..=8.0).contains(&style.scale) {
            return Err(ConfigError::InvalidValue(
                name.to_string(),
                "scale",
                style.scale.to_string(),
            ));
        }

        out.insert(name.to_string(), style);
    }

    Ok(out)
}

fn parse_type_field(
    section: &str,
    raw: &str,
) -> Result<(String, String, String), ConfigError> {
    let parts: Vec<&str> = raw.split_whitespace().collect();
    if parts.len() != 3 {
        return Err(ConfigError::InvalidValue(
            section.to_string(),
            "type",
            raw.to_string(),
        ));
    }
    Ok((parts[0].to_string(), parts[1].to_string(), parts[2].to_string()))
}

fn is_renderd_n(name: &str) -> bool {
    name.strip_prefix("renderd")
        .map(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ini() -> Ini {
        let text = "\
[mapnik]
plugins_dir=/usr/lib/mapnik/input
font_dir=/usr/share/fonts
font_dir_recurse=true

[renderd]
num_threads=4
tile_dir=/var/lib/mod_tile

[default]
uri=/osm/
xml=/etc/renderd/style.xml
host=tile.example.org
tilesize=256
type=png image/png png256
";
        Ini::load_from_str(text).unwrap()
    }

    #[test]
    fn parses_mapnik_and_renderd_and_style_sections() {
        let conf = Config::from_ini(&sample_ini()).unwrap();
        assert_eq!(conf.mapnik.plugins_dir, "/usr/lib/mapnik/input");
        assert!(conf.mapnik.font_dir_recurse);

        let active = conf.active_renderd(0).unwrap();
        assert_eq!(active.num_threads, 4);

        let style = conf.styles.get("default").unwrap();
        assert_eq!(style.mime_type, "image/png");
        assert_eq!(style.host, "tile.example.org");
    }

    #[test]
    fn missing_active_slave_is_an_error() {
        let conf = Config::from_ini(&sample_ini()).unwrap();
        assert!(conf.active_renderd(3).is_err());
    }

    #[test]
    fn style_missing_xml_is_an_error() {
        let text = "[broken]\nuri=/x/\n";
        let ini = Ini::load_from_str(text).unwrap();
        assert!(Config::from_ini(&ini).is_err());
    }

    #[test]
    fn scale_out_of_range_is_rejected() {
        let text = "[broken]\nuri=/x/\nxml=/a.xml\nscale=10\n";
        let ini = Ini::load_from_str(text).unwrap();
        assert!(Config::from_ini(&ini).is_err());
    }
}
