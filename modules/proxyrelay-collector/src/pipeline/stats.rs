use std::collections::BTreeMap;

use proxyrelay_common::Category;

/// Stats from a relay run.
#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    pub channels_total: u32,
    pub channels_valid: u32,
    pub channels_invalid: u32,
    /// Unique values per category after dedup.
    pub unique_by_category: BTreeMap<Category, u32>,
    pub attachments: u32,
    pub tag_buckets: u32,
    pub proxies_selected: u32,
    pub posts_selected: u32,
    pub posts_sent: u32,
    pub posts_failed: u32,
    pub publish_skipped: bool,
}

impl RunSummary {
    pub fn unique_total(&self) -> u32 {
        self.unique_by_category.values().sum()
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Relay Run Complete ===")?;
        writeln!(f, "Channels:          {}", self.channels_total)?;
        writeln!(f, "  Valid:           {}", self.channels_valid)?;
        writeln!(f, "  Invalid:         {}", self.channels_invalid)?;
        writeln!(f, "Unique records:    {}", self.unique_total())?;
        writeln!(f, "Attachments:       {}", self.attachments)?;
        writeln!(f, "Tag buckets:       {}", self.tag_buckets)?;
        writeln!(f, "\nBy category:")?;
        for category in Category::ALL {
            let count = self.unique_by_category.get(&category).copied().unwrap_or(0);
            writeln!(f, "  {:<12} {}", category.label(), count)?;
        }
        writeln!(f, "\nSelection:")?;
        writeln!(f, "  Posts:   {}", self.posts_selected)?;
        writeln!(f, "  Proxies: {}", self.proxies_selected)?;
        if self.publish_skipped {
            writeln!(f, "\nPublishing skipped")?;
        } else {
            writeln!(f, "\nPublished:")?;
            writeln!(f, "  Sent:    {}", self.posts_sent)?;
            writeln!(f, "  Failed:  {}", self.posts_failed)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_every_category() {
        let mut summary = RunSummary {
            channels_total: 3,
            channels_valid: 2,
            channels_invalid: 1,
            ..Default::default()
        };
        summary.unique_by_category.insert(Category::Vless, 3);
        summary.unique_by_category.insert(Category::Proxy, 8);

        let text = summary.to_string();
        assert_eq!(summary.unique_total(), 11);
        for category in Category::ALL {
            assert!(text.contains(category.label()), "missing {category}");
        }
        assert!(text.contains("Invalid:         1"));
        assert!(text.contains("Sent:"));
    }
}
