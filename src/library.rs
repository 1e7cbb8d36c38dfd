//! Views over a parsed channel list: groups and filters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::channels::Channel;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelGroup {
    pub title: String,
    pub count: usize,
}

/// Unique groups with their channel counts, sorted by title.
pub fn group_channels(channels: &[Channel]) -> Vec<ChannelGroup> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for channel in channels {
        *counts.entry(channel.group()).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(title, count)| ChannelGroup {
            title: title.to_string(),
            count,
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelFilter {
    pub search: Option<String>,
    pub group: Option<String>,
}

impl ChannelFilter {
    fn search_term(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(str::to_lowercase)
    }

    fn group(&self) -> Option<&str> {
        self.group.as_deref().filter(|group| !group.trim().is_empty())
    }

    pub fn matches(&self, channel: &Channel) -> bool {
        self.matches_term(channel, self.search_term().as_deref())
    }

    fn matches_term(&self, channel: &Channel, term: Option<&str>) -> bool {
        if let Some(term) = term {
            let hit = channel.title.to_lowercase().contains(term)
                || channel.tvg_name.to_lowercase().contains(term);
            if !hit {
                return false;
            }
        }
        match self.group() {
            Some(group) => channel.group() == group,
            None => true,
        }
    }
}

/// Channels matching both the search term and the group, in input order.
pub fn filter_channels(channels: &[Channel], filter: &ChannelFilter) -> Vec<Channel> {
    let term = filter.search_term();
    channels
        .iter()
        .filter(|channel| filter.matches_term(channel, term.as_deref()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(title: &str, tvg_name: &str, group: &str) -> Channel {
        Channel {
            title: title.to_string(),
            tvg_name: tvg_name.to_string(),
            group_title: group.to_string(),
            url: format!("http://example.com/{title}"),
            ..Default::default()
        }
    }

    fn sample() -> Vec<Channel> {
        vec![
            channel("BBC One HD", "BBC One", "UK"),
            channel("CNN", "", "News"),
            channel("ITV", "itv1", "UK"),
            channel("Sky News", "", "News"),
            channel("Local", "", "No Group"),
        ]
    }

    #[test]
    fn test_group_channels_sorted_with_counts() {
        let groups = group_channels(&sample());
        assert_eq!(
            groups,
            vec![
                ChannelGroup { title: "News".to_string(), count: 2 },
                ChannelGroup { title: "No Group".to_string(), count: 1 },
                ChannelGroup { title: "UK".to_string(), count: 2 },
            ]
        );
        let total: usize = groups.iter().map(|g| g.count).sum();
        assert_eq!(total, sample().len());
    }

    #[test]
    fn test_empty_group_counts_as_default() {
        let groups = group_channels(&[channel("a", "", ""), channel("b", "", "No Group")]);
        assert_eq!(groups, vec![ChannelGroup { title: "No Group".to_string(), count: 2 }]);
    }

    #[test]
    fn test_search_matches_title_or_tvg_name() {
        let filter = ChannelFilter {
            search: Some("  news ".to_string()),
            group: None,
        };
        let titles: Vec<String> = filter_channels(&sample(), &filter)
            .into_iter()
            .map(|c| c.title)
            .collect();
        assert_eq!(titles, vec!["Sky News"]);

        let filter = ChannelFilter {
            search: Some("ITV1".to_string()),
            group: None,
        };
        assert_eq!(filter_channels(&sample(), &filter)[0].title, "ITV");
    }

    #[test]
    fn test_group_and_search_combine() {
        let filter = ChannelFilter {
            search: Some("n".to_string()),
            group: Some("News".to_string()),
        };
        let titles: Vec<String> = filter_channels(&sample(), &filter)
            .into_iter()
            .map(|c| c.title)
            .collect();
        assert_eq!(titles, vec!["CNN", "Sky News"]);
        assert!(filter.matches(&sample()[1]));
        assert!(!filter.matches(&sample()[0]));
    }

    #[test]
    fn test_no_criteria_returns_everything() {
        let filter = ChannelFilter {
            search: Some("   ".to_string()),
            group: Some(String::new()),
        };
        assert_eq!(filter_channels(&sample(), &filter), sample());
        assert_eq!(filter_channels(&sample(), &ChannelFilter::default()), sample());
    }
}
