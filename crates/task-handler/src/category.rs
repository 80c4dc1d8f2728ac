use std::fmt;

/// An independent class of background work.
///
/// Implementors are expected to be fieldless enums: [`Category::ALL`] lists every variant and
/// [`Category::slot`] maps each one to its position in that list. The handler checks this mapping
/// when it is built and then uses the slot to index its per-category state directly.
///
/// ```
/// use task_handler::Category;
///
/// #[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// enum Work {
/// 	Thumbnails,
/// 	Sync,
/// }
///
/// impl Category for Work {
/// 	const ALL: &'static [Self] = &[Self::Thumbnails, Self::Sync];
///
/// 	fn slot(self) -> usize {
/// 		self as usize
/// 	}
/// }
/// ```
pub trait Category: Copy + Eq + fmt::Debug + Send + Sync + 'static {
	const ALL: &'static [Self];

	fn slot(self) -> usize;
}

/// The categories of work the card wallet schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
	Barcode,
	Import,
	Export,
}

impl Category for TaskKind {
	const ALL: &'static [Self] = &[Self::Barcode, Self::Import, Self::Export];

	fn slot(self) -> usize {
		self as usize
	}
}
