/// An ordered play queue of catalog paths with a cursor.
///
/// The cursor starts before the first track; [`advance`](Self::advance)
/// moves onto it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Playlist {
    tracks: Vec<String>,
    cursor: Option<usize>,
    repeat: bool,
}

impl Playlist {
    pub fn new(tracks: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            tracks: tracks.into_iter().map(Into::into).collect(),
            cursor: None,
            repeat: false,
        }
    }

    /// Wrap around to the first track after the last.
    pub fn with_repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks(&self) -> &[String] {
        &self.tracks
    }

    pub fn current(&self) -> Option<&str> {
        self.cursor.and_then(|i| self.tracks.get(i)).map(String::as_str)
    }

    /// Move to the next track. At the end of the list this returns `None`
    /// and leaves the cursor on the last track, unless repeating.
    pub fn advance(&mut self) -> Option<&str> {
        let next = match self.cursor {
            None => 0,
            Some(i) if i + 1 < self.tracks.len() => i + 1,
            Some(_) if self.repeat => 0,
            Some(_) => return None,
        };
        if next >= self.tracks.len() {
            return None;
        }
        self.cursor = Some(next);
        self.current()
    }

    /// Move to the previous track; stays on the first one.
    pub fn previous(&mut self) -> Option<&str> {
        let i = self.cursor?;
        self.cursor = Some(i.saturating_sub(1));
        self.current()
    }

    /// Put the cursor on `path`, if it is queued.
    pub fn select(&mut self, path: &str) -> Option<&str> {
        let i = self.tracks.iter().position(|t| t == path)?;
        self.cursor = Some(i);
        self.current()
    }
}
