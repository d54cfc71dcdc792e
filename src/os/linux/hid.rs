//! Just enough of a HID report descriptor parser to find the top-level
//! usages of a device.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HidTy {
    Main(HidMain),
    Global(HidGlobal),
    Local(HidLocal),
    LongItem,
    Reserved(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HidMain {
    Input,
    Output,
    Feature,
    Collection,
    EndCollection,
    Reserved(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HidGlobal {
    UsagePage,
    ReportId,
    Other(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HidLocal {
    Usage,
    Other(u8),
}

bitfield::bitfield! {
    pub struct HidItemType(u8);
    impl Debug;
    get_size, _: 1, 0;
    get_ty, _: 3, 2;
    get_tag, _: 7, 4;
}

impl HidItemType {
    pub fn size(&self) -> usize {
        match self.get_size() {
            0 => 0,
            1 => 1,
            2 => 2,
            _ => 4,
        }
    }

    pub fn ty(&self) -> HidTy {
        let tag = self.get_tag();
        match (self.get_ty(), tag) {
            (0, 0b1000) => HidTy::Main(HidMain::Input),
            (0, 0b1001) => HidTy::Main(HidMain::Output),
            (0, 0b1011) => HidTy::Main(HidMain::Feature),
            (0, 0b1010) => HidTy::Main(HidMain::Collection),
            (0, 0b1100) => HidTy::Main(HidMain::EndCollection),
            (0, tag) => HidTy::Main(HidMain::Reserved(tag)),
            (1, 0b0000) => HidTy::Global(HidGlobal::UsagePage),
            (1, 0b1000) => HidTy::Global(HidGlobal::ReportId),
            (1, tag) => HidTy::Global(HidGlobal::Other(tag)),
            (2, 0b0000) => HidTy::Local(HidLocal::Usage),
            (2, tag) => HidTy::Local(HidLocal::Other(tag)),
            (_, 0b1111) => HidTy::LongItem,
            (_, tag) => HidTy::Reserved(tag),
        }
    }
}

pub enum HidItem<'a> {
    SmallItem(u32),
    LongItem(&'a [u8]),
}

/// Iterates over the items of a report descriptor. Stops at the first
/// truncated item.
pub struct HidItemIterator<'a> {
    desc: &'a [u8],
}

impl<'a> Iterator for HidItemIterator<'a> {
    type Item = (HidTy, HidItem<'a>);

    fn next(&mut self) -> Option<(HidTy, HidItem<'a>)> {
        let key = HidItemType(*self.desc.get(0)?);
        let ty = key.ty();
        if ty == HidTy::LongItem {
            let data_size = *self.desc.get(1)? as usize;
            let item_data = self.desc.get(3..3 + data_size)?;
            self.desc = &self.desc[3 + data_size..];
            return Some((ty, HidItem::LongItem(item_data)));
        }

        let size = key.size();
        let raw = self.desc.get(1..1 + size)?;
        let mut bytes = [0u8; 4];
        bytes[..size].copy_from_slice(raw);
        self.desc = &self.desc[1 + size..];
        Some((ty, HidItem::SmallItem(u32::from_le_bytes(bytes))))
    }
}

pub fn iterate_hid_descriptor(desc: &[u8]) -> HidItemIterator<'_> {
    HidItemIterator { desc }
}

/// (usage page, usage) of each collection in the descriptor.
pub struct UsagesIter<'a> {
    hid_items: HidItemIterator<'a>,
    cur_usage_page: u16,
    cur_usage: Option<u16>,
}

impl<'a> Iterator for UsagesIter<'a> {
    type Item = (u16, u16);

    fn next(&mut self) -> Option<(u16, u16)> {
        while let Some((item, data)) = self.hid_items.next() {
            match (item, data) {
                (HidTy::Global(HidGlobal::UsagePage), HidItem::SmallItem(page)) => {
                    self.cur_usage_page = page as u16;
                }
                (HidTy::Local(HidLocal::Usage), HidItem::SmallItem(usage)) => {
                    self.cur_usage = Some(usage as u16);
                }
                (HidTy::Main(HidMain::Collection), _) => {
                    if let Some(cur_usage) = self.cur_usage.take() {
                        return Some((self.cur_usage_page, cur_usage));
                    }
                    log::warn!("Collection without usage!");
                }
                (HidTy::Main(_), _) => {
                    self.cur_usage = None;
                }
                _ => (),
            }
        }
        None
    }
}

pub fn usages(desc: &[u8]) -> UsagesIter<'_> {
    UsagesIter {
        hid_items: iterate_hid_descriptor(desc),
        cur_usage_page: 0,
        cur_usage: None,
    }
}
