//! The EPG Generator (spec §4.7): composes an XMLTV document from the
//! current channel lineup plus the Playout Engine's projected timeline.
//!
//! Serialization is grounded on the teacher's `quick-xml` usage elsewhere in
//! the pack (a streaming reader for ingesting upstream XMLTV); here a
//! `quick_xml::Writer` produces the outbound document instead, since this
//! domain only ever produces XMLTV rather than importing it.

use std::collections::HashMap;
use std::io::Cursor;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::catalog::SharedCatalog;
use crate::errors::{ChannelResult, EpgError, EpgResult};
use crate::models::PlayoutItem;
use crate::playout::PlayoutEngine;

const DEFAULT_BUILD_DAYS: i64 = 3;
/// Spec §4.7: "no gaps > 1 s" between consecutive programmes.
const MAX_GAP_MS: i64 = 1_000;

pub struct EpgGenerator {
    catalog: SharedCatalog,
    playout: std::sync::Arc<PlayoutEngine>,
}

/// One channel's validated projected timeline, ready to render.
struct ChannelGuide {
    guide_id: String,
    name: String,
    items: Vec<PlayoutItem>,
    /// `MediaItem.title` keyed by `media_item_id`, batch-loaded once per
    /// channel rather than once per programme entry.
    titles: HashMap<i64, String>,
}

impl EpgGenerator {
    pub fn new(catalog: SharedCatalog, playout: std::sync::Arc<PlayoutEngine>) -> Self {
        Self { catalog, playout }
    }

    /// Build and validate the full document. Returns `Err` rather than a
    /// corrupt/empty guide on any validation failure — callers map that to
    /// `503 + Retry-After` per spec §4.7.
    pub async fn build(&self, build_days: Option<i64>) -> EpgResult<String> {
        let build_days = build_days.unwrap_or(DEFAULT_BUILD_DAYS);
        let now = Utc::now();
        let until = now + ChronoDuration::days(build_days);

        let channels = self.catalog.list_channels().await?;
        let enabled: Vec<_> = channels.into_iter().filter(|c| c.enabled).collect();
        if enabled.is_empty() {
            return Err(EpgError::EmptyLineup);
        }

        let mut guides = Vec::with_capacity(enabled.len());
        for channel in &enabled {
            let items = self
                .project(channel, now, until)
                .await
                .map_err(|e| EpgError::ProjectionFailed(channel.id, e))?;
            validate_timeline(channel.id, &items)?;
            let titles = self.load_titles(&items).await?;
            guides.push(ChannelGuide {
                guide_id: format!("exstream-{}", channel.id),
                name: channel.name.clone(),
                items,
                titles,
            });
        }

        render(&guides)
    }

    async fn project(
        &self,
        channel: &crate::models::Channel,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> ChannelResult<Vec<PlayoutItem>> {
        self.playout.project_timeline(channel, now, until).await
    }

    /// Batch-fetch `MediaItem.title` for every unique item referenced in a
    /// channel's projected timeline, so `render` never has to re-hit the
    /// catalog per programme entry.
    async fn load_titles(&self, items: &[PlayoutItem]) -> EpgResult<HashMap<i64, String>> {
        let mut titles = HashMap::new();
        for item in items {
            if titles.contains_key(&item.media_item_id) {
                continue;
            }
            let media_item = self.catalog.get_media_item(item.media_item_id).await?;
            titles.insert(item.media_item_id, media_item.title);
        }
        Ok(titles)
    }
}

/// Spec §4.7: programme times strictly monotonic per channel, no overlaps,
/// no gaps > 1s, titles non-empty (checked upstream via `MediaItem.title`,
/// which the catalog enforces `NOT NULL` on).
fn validate_timeline(channel_id: i64, items: &[PlayoutItem]) -> EpgResult<()> {
    if items.is_empty() {
        return Err(EpgError::ValidationFailed {
            channel_id,
            message: "empty projected timeline".to_string(),
        });
    }
    let mut prev_stop: Option<DateTime<Utc>> = None;
    for item in items {
        let stop = item.scheduled_start + ChronoDuration::milliseconds(item.duration_ms);
        if let Some(prev_stop) = prev_stop {
            if item.scheduled_start < prev_stop {
                return Err(EpgError::ValidationFailed {
                    channel_id,
                    message: "overlapping programme entries".to_string(),
                });
            }
            let gap = (item.scheduled_start - prev_stop).num_milliseconds();
            if gap > MAX_GAP_MS {
                return Err(EpgError::ValidationFailed {
                    channel_id,
                    message: format!("gap of {gap}ms exceeds 1s tolerance"),
                });
            }
        }
        prev_stop = Some(stop);
    }
    Ok(())
}

fn render(guides: &[ChannelGuide]) -> EpgResult<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Start(BytesStart::new("tv")))
        .map_err(xml_err)?;

    for guide in guides {
        let mut channel_el = BytesStart::new("channel");
        channel_el.push_attribute(("id", guide.guide_id.as_str()));
        writer.write_event(Event::Start(channel_el)).map_err(xml_err)?;
        write_text_el(&mut writer, "display-name", &guide.name)?;
        writer
            .write_event(Event::End(BytesEnd::new("channel")))
            .map_err(xml_err)?;
    }

    for guide in guides {
        for item in &guide.items {
            let stop = item.scheduled_start + ChronoDuration::milliseconds(item.duration_ms);
            let mut programme = BytesStart::new("programme");
            programme.push_attribute(("start", xmltv_timestamp(item.scheduled_start).as_str()));
            programme.push_attribute(("stop", xmltv_timestamp(stop).as_str()));
            programme.push_attribute(("channel", guide.guide_id.as_str()));
            writer.write_event(Event::Start(programme)).map_err(xml_err)?;
            let fallback = if item.is_filler { "Filler" } else { "Programme" };
            let title = guide
                .titles
                .get(&item.media_item_id)
                .map(String::as_str)
                .unwrap_or(fallback);
            write_text_el(&mut writer, "title", title)?;
            writer
                .write_event(Event::End(BytesEnd::new("programme")))
                .map_err(xml_err)?;
        }
    }

    writer
        .write_event(Event::End(BytesEnd::new("tv")))
        .map_err(xml_err)?;

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|e| EpgError::Xml(format!("non-utf8 xmltv output: {e}")))
}

fn write_text_el(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    tag: &str,
    text: &str,
) -> EpgResult<()> {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .map_err(xml_err)?;
    Ok(())
}

fn xmltv_timestamp(dt: DateTime<Utc>) -> String {
    dt.format("%Y%m%d%H%M%S %z").to_string()
}

fn xml_err(e: std::io::Error) -> EpgError {
    EpgError::Xml(format!("xml write failed: {e}"))
}
