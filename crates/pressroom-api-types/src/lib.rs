//! Wire types shared by the Pressroom server, its render target pages, and clients.

mod notification;
mod payload;
mod requests;

pub use notification::{
    ClientFrame, NotificationMessage, NotificationStatus, NotificationTarget, NotificationTracker,
};
pub use payload::{
    IMAGE_ITEM_TYPE, ItemLayout, PrintItem, PrintWarning, RESOURCE_MISSING_CODE, RenderPayload,
};
pub use requests::{
    DownloadFileQuery, DownloadLinkResponse, GenerateRequest, GenerationAccepted, OutputKind,
};
