// crates/stagecast-core/src/registry.rs
//
// Process-level registries: audio channel layouts, audio mix configurations,
// and help items. Names are case-insensitive. Lookups are thread-safe;
// registration happens during one-time setup.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use crate::error::CoreError;

// ── Audio channel layout ──────────────────────────────────────────────────────

/// Reserved for the mix-config expression syntax; forbidden in channel-order
/// strings.
const MIX_CONFIG_PUNCTUATION: &[char] = &['=', '<', '+', '*', '|'];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioChannelLayout {
    pub num_channels:  usize,
    pub layout_type:   String,
    pub channel_order: Vec<String>,
}

impl AudioChannelLayout {
    pub fn new(
        num_channels: usize,
        layout_type: &str,
        channel_order: &str,
    ) -> Result<Self, CoreError> {
        if num_channels < 1 {
            return Err(CoreError::InvalidArgument(
                "num_channels cannot be less than 1".into(),
            ));
        }
        if channel_order.contains(MIX_CONFIG_PUNCTUATION) {
            return Err(CoreError::InvalidArgument(format!(
                "{channel_order} contains illegal characters =<+*| reserved for mix config syntax"
            )));
        }

        let channel_order: Vec<String> = channel_order
            .split_whitespace()
            .map(|name| name.to_string())
            .collect();

        if channel_order.len() > num_channels {
            return Err(CoreError::InvalidArgument(format!(
                "channel order names more than {num_channels} channels"
            )));
        }

        Ok(Self {
            num_channels,
            layout_type: layout_type.to_uppercase(),
            channel_order,
        })
    }

    pub fn indexes_of(&self, channel_name: &str) -> Vec<usize> {
        self.channel_order
            .iter()
            .enumerate()
            .filter(|(_, name)| *name == channel_name)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn print(&self) -> String {
        format!(
            "[audio_channel_layout] num_channels={} type={} channel_order={}",
            self.num_channels,
            self.layout_type,
            self.channel_order.join(" ")
        )
    }
}

#[derive(Default)]
pub struct AudioChannelLayoutRepository {
    layouts: Mutex<HashMap<String, AudioChannelLayout>>,
}

impl AudioChannelLayoutRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_layout(&self, name: &str, layout: AudioChannelLayout) {
        self.layouts
            .lock()
            .unwrap()
            .insert(name.to_uppercase(), layout);
    }

    pub fn get_layout(&self, name: &str) -> Option<AudioChannelLayout> {
        self.layouts
            .lock()
            .unwrap()
            .get(&name.to_uppercase())
            .cloned()
    }
}

// ── Audio mix configs ─────────────────────────────────────────────────────────

/// `(from_type, to_type) → mix expression` used when routing audio between
/// layouts of different types.
#[derive(Default)]
pub struct AudioMixConfigRepository {
    configs: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl AudioMixConfigRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_config(&self, from_type: &str, to_types: &[&str], mix_config: &str) {
        let mut configs = self.configs.lock().unwrap();
        let from = configs.entry(from_type.to_uppercase()).or_default();
        for to_type in to_types {
            let to_type = to_type.trim();
            if to_type.is_empty() {
                continue;
            }
            from.insert(to_type.to_uppercase(), mix_config.to_string());
        }
    }

    pub fn get_config(&self, from_type: &str, to_type: &str) -> Option<String> {
        self.configs
            .lock()
            .unwrap()
            .get(&from_type.to_uppercase())
            .and_then(|to| to.get(&to_type.to_uppercase()))
            .cloned()
    }
}

// ── Help repository ───────────────────────────────────────────────────────────

/// Receives the formatted help for one item at a time.
pub trait HelpSink {
    fn begin_item(&mut self, name: &str);
    fn text(&mut self, text: &str);
    fn example(&mut self, code: &str, explanation: &str);
    fn end_item(&mut self);
}

pub type HelpItemDescriber = Arc<dyn Fn(&mut dyn HelpSink) + Send + Sync>;

struct HelpItem {
    name:      String,
    tags:      BTreeSet<String>,
    describer: HelpItemDescriber,
}

/// Tag-indexed help items. A query lists an item iff the query's tags are a
/// subset of the item's tags.
#[derive(Default)]
pub struct HelpRepository {
    items: Mutex<Vec<HelpItem>>,
}

impl HelpRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_item(
        &self,
        tags: BTreeSet<String>,
        name: &str,
        describer: HelpItemDescriber,
    ) {
        self.items.lock().unwrap().push(HelpItem {
            name: name.to_string(),
            tags,
            describer,
        });
    }

    pub fn help(&self, tags: &BTreeSet<String>, sink: &mut dyn HelpSink) {
        for item in self.items.lock().unwrap().iter() {
            if tags.is_subset(&item.tags) {
                sink.begin_item(&item.name);
                (item.describer)(sink);
                sink.end_item();
            }
        }
    }

    pub fn help_for_name(
        &self,
        tags: &BTreeSet<String>,
        name: &str,
        sink: &mut dyn HelpSink,
    ) -> Result<(), CoreError> {
        let mut found = false;
        for item in self.items.lock().unwrap().iter() {
            if item.name.eq_ignore_ascii_case(name) && tags.is_subset(&item.tags) {
                sink.begin_item(&item.name);
                (item.describer)(sink);
                sink.end_item();
                found = true;
            }
        }
        if found {
            Ok(())
        } else {
            Err(CoreError::NotFound(format!("could not find help item {name}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_rejects_reserved_punctuation() {
        assert!(AudioChannelLayout::new(2, "stereo", "L+R").is_err());
        assert!(AudioChannelLayout::new(2, "stereo", "L=R").is_err());
        assert!(AudioChannelLayout::new(0, "none", "").is_err());
        assert!(AudioChannelLayout::new(2, "stereo", "L R C").is_err());
    }

    #[test]
    fn layout_splits_channel_order_on_whitespace() {
        let layout = AudioChannelLayout::new(6, "5.1", "L R C LFE  Ls Rs").unwrap();
        assert_eq!(layout.channel_order.len(), 6);
        assert_eq!(layout.indexes_of("LFE"), vec![3]);
        assert_eq!(layout.layout_type, "5.1");
    }

    #[test]
    fn layout_repository_is_case_insensitive() {
        let repo = AudioChannelLayoutRepository::new();
        repo.register_layout(
            "stereo",
            AudioChannelLayout::new(2, "STEREO", "L R").unwrap(),
        );
        assert!(repo.get_layout("Stereo").is_some());
        assert!(repo.get_layout("mono").is_none());
    }

    #[test]
    fn mix_configs_are_keyed_by_type_pair() {
        let repo = AudioMixConfigRepository::new();
        repo.register_config("5.1", &["STEREO", "dual-mono"], "L = L + 0.707 * C");
        assert_eq!(
            repo.get_config("5.1", "stereo").as_deref(),
            Some("L = L + 0.707 * C")
        );
        assert!(repo.get_config("stereo", "5.1").is_none());
    }

    #[derive(Default)]
    struct CollectingSink {
        items: Vec<String>,
    }

    impl HelpSink for CollectingSink {
        fn begin_item(&mut self, name: &str) {
            self.items.push(name.to_string());
        }

        fn text(&mut self, _text: &str) {}

        fn example(&mut self, _code: &str, _explanation: &str) {}

        fn end_item(&mut self) {}
    }

    fn tags(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn help_matches_by_tag_subset() {
        let repo = HelpRepository::new();
        repo.register_item(tags(&["producer", "ffmpeg"]), "FFMPEG", Arc::new(|_| {}));
        repo.register_item(tags(&["consumer"]), "SCREEN", Arc::new(|_| {}));

        let mut sink = CollectingSink::default();
        repo.help(&tags(&["producer"]), &mut sink);
        assert_eq!(sink.items, vec!["FFMPEG"]);

        let mut sink = CollectingSink::default();
        repo.help(&tags(&[]), &mut sink);
        assert_eq!(sink.items.len(), 2);
    }

    #[test]
    fn help_by_name_reports_missing_items() {
        let repo = HelpRepository::new();
        let mut sink = CollectingSink::default();
        assert!(repo
            .help_for_name(&BTreeSet::new(), "MISSING", &mut sink)
            .is_err());
    }
}
