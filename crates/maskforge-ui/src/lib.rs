#![warn(missing_docs)]
//! # maskforge-ui
//!
//! ## Purpose
//! Client-side state for the feature views and the packaging of mask-edit
//! submissions.
//!
//! ## Responsibilities
//! - Hold one [`FeatureView`] per feature with a single in-flight flag.
//! - Surface the server's `message` verbatim.
//! - Track freehand annotation over a letterboxed source ([`InpaintSession`]).
//! - Package `{prompt, image PNG, mask PNG, maskKind}` for the edit route.
//!
//! ## Data flow
//! Upload -> [`InpaintSession::new`] (composite) -> pointer events -> strokes
//! -> [`InpaintSession::prepare_inpaint_submission`] (derive mask) ->
//! [`Submission::form_fields`] -> HTTP -> [`FeatureView::settle`].
//!
//! ## Ownership and lifetimes
//! The session owns the composited original and never mutates it; the
//! annotated layer is re-rendered from strokes on demand.
//!
//! ## Error model
//! A second submit while one is in flight is refused with
//! [`UiError::InFlight`]; nothing is cancelled.
//!
//! ## Security and privacy notes
//! View state holds result locators and messages only, never raw uploads.

use maskforge_canvas::{
    BrushStyle, CanvasError, Stroke, SurfaceGeometry, Transform, composite, render_strokes,
};
use maskforge_contract::{ClientReply, parse_client_reply};
use maskforge_core::{Bitmap, CoreError, GenerationResult, PNG_MEDIA_TYPE, Rgba};
use maskforge_mask::{MaskError, MaskKind, build_expansion, derive_mask};
use serde_json::Value;
use thiserror::Error;

/// User-facing features, one view each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    /// Prompt-only generation.
    TextToImage,
    /// Masked edit of a region drawn by the user.
    Inpaint,
    /// Canvas expansion around the source.
    Outpaint,
    /// Merge of several images.
    Combine,
    /// Question about an image.
    Understand,
    /// Prompt-only generation through a workflow webhook called directly.
    WebhookTextToImage,
}

impl FeatureKind {
    /// Every feature, in menu order.
    pub const ALL: [FeatureKind; 6] = [
        FeatureKind::TextToImage,
        FeatureKind::Inpaint,
        FeatureKind::Outpaint,
        FeatureKind::Combine,
        FeatureKind::Understand,
        FeatureKind::WebhookTextToImage,
    ];

    /// Server route, `None` for the direct webhook.
    pub fn route(self) -> Option<&'static str> {
        match self {
            Self::TextToImage => Some("/api/generate-image"),
            Self::Inpaint | Self::Outpaint => Some("/api/edit-image"),
            Self::Combine => Some("/api/combine-images"),
            Self::Understand => Some("/api/understand-image"),
            Self::WebhookTextToImage => None,
        }
    }
}

/// Per-feature view state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureView {
    /// Feature this view drives.
    pub kind: FeatureKind,
    in_flight: bool,
    last_reply: Option<ClientReply>,
}

impl FeatureView {
    /// Idle view.
    pub fn new(kind: FeatureKind) -> Self {
        Self {
            kind,
            in_flight: false,
            last_reply: None,
        }
    }

    /// Returns `true` while a call is outstanding.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Marks a call as started.
    ///
    /// # Errors
    /// Returns [`UiError::InFlight`] when a previous call has not settled.
    pub fn begin_submit(&mut self) -> Result<(), UiError> {
        if self.in_flight {
            return Err(UiError::InFlight);
        }
        self.in_flight = true;
        self.last_reply = None;
        Ok(())
    }

    /// Settles the outstanding call with the server's raw reply.
    pub fn settle(&mut self, status: u16, body: &str) -> &ClientReply {
        self.finish(parse_client_reply(status, body))
    }

    /// Settles a direct webhook call by decoding its raw JSON reply.
    pub fn settle_webhook(&mut self, raw: &Value) -> &ClientReply {
        let reply = match maskforge_contract::decode_response(raw) {
            GenerationResult::Image { locator } => ClientReply::Image(locator),
            GenerationResult::Text { explanation } => ClientReply::Failure {
                status: 200,
                message: explanation,
            },
            GenerationResult::Error { detail, .. } => ClientReply::Failure {
                status: 502,
                message: format!("Webhook reply could not be read: {detail}"),
            },
        };
        self.finish(reply)
    }

    /// Settles a call that never produced an HTTP reply.
    pub fn settle_network_failure(&mut self, message: impl Into<String>) -> &ClientReply {
        self.finish(ClientReply::Failure {
            status: 0,
            message: message.into(),
        })
    }

    fn finish(&mut self, reply: ClientReply) -> &ClientReply {
        self.in_flight = false;
        self.last_reply.insert(reply)
    }

    /// Last settled reply.
    pub fn last_reply(&self) -> Option<&ClientReply> {
        self.last_reply.as_ref()
    }

    /// Failure text to display, exactly as received.
    pub fn error_message(&self) -> Option<&str> {
        match &self.last_reply {
            Some(ClientReply::Failure { message, .. }) => Some(message),
            _ => None,
        }
    }
}

/// All feature views plus the active selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientState {
    /// App version shown in the footer.
    pub version: String,
    /// Feature currently shown.
    pub active: FeatureKind,
    views: Vec<FeatureView>,
}

impl ClientState {
    /// Creates idle views for every feature.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            active: FeatureKind::TextToImage,
            views: FeatureKind::ALL.into_iter().map(FeatureView::new).collect(),
        }
    }

    /// Switches the visible feature. Outstanding calls keep running.
    pub fn switch_to(&mut self, kind: FeatureKind) {
        self.active = kind;
    }

    /// View for `kind`.
    pub fn view(&self, kind: FeatureKind) -> Option<&FeatureView> {
        self.views.iter().find(|view| view.kind == kind)
    }

    /// Mutable view for `kind`.
    pub fn view_mut(&mut self, kind: FeatureKind) -> Option<&mut FeatureView> {
        self.views.iter_mut().find(|view| view.kind == kind)
    }
}

/// Freehand annotation over one letterboxed source image.
#[derive(Debug, Clone)]
pub struct InpaintSession {
    geometry: SurfaceGeometry,
    original: Bitmap,
    transform: Transform,
    brush: BrushStyle,
    strokes: Vec<Stroke>,
    drawing: bool,
}

impl InpaintSession {
    /// Composites `source` onto a surface sized by `geometry`.
    ///
    /// # Errors
    /// Returns [`UiError::Canvas`] when the composite cannot be built.
    pub fn new(source: &Bitmap, geometry: SurfaceGeometry) -> Result<Self, UiError> {
        let (original, transform) = composite(source, geometry.surface, Rgba::OPAQUE_WHITE)?;
        Ok(Self {
            geometry,
            original,
            transform,
            brush: BrushStyle::default(),
            strokes: Vec::new(),
            drawing: false,
        })
    }

    /// Composited source without annotation.
    pub fn original(&self) -> &Bitmap {
        &self.original
    }

    /// Placement of the source on the surface.
    pub fn transform(&self) -> Transform {
        self.transform
    }

    /// Completed and in-progress strokes.
    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    /// Starts a stroke at a pointer position in display units.
    pub fn pointer_down(&mut self, x: f32, y: f32) {
        let (sx, sy) = self.geometry.to_surface_point(x, y);
        self.strokes.push(Stroke::begin(sx, sy));
        self.drawing = true;
    }

    /// Extends the current stroke; ignored when no stroke is active.
    pub fn pointer_move(&mut self, x: f32, y: f32) {
        if !self.drawing {
            return;
        }
        let (sx, sy) = self.geometry.to_surface_point(x, y);
        if let Some(stroke) = self.strokes.last_mut() {
            stroke.line_to(sx, sy);
        }
    }

    /// Ends the current stroke.
    pub fn pointer_up(&mut self) {
        self.drawing = false;
    }

    /// Removes every stroke.
    pub fn clear(&mut self) {
        self.strokes.clear();
        self.drawing = false;
    }

    /// Stroke layer: the composited source with strokes drawn on top.
    ///
    /// # Errors
    /// Returns [`UiError::Canvas`] when rendering fails.
    pub fn annotated(&self) -> Result<Bitmap, UiError> {
        Ok(render_strokes(&self.original, &self.strokes, self.brush)?)
    }

    /// Packages the composited source and the derived edit mask.
    ///
    /// # Errors
    /// - [`UiError::EmptyPrompt`] for a blank prompt.
    /// - [`UiError::NothingSelected`] when the strokes change no pixel.
    /// - [`UiError::Mask`] / [`UiError::Core`] for derivation or encoding failures.
    pub fn prepare_inpaint_submission(&self, prompt: &str) -> Result<Submission, UiError> {
        let prompt = non_blank(prompt)?;
        let mask = derive_mask(&self.original, &self.annotated()?)?;
        if mask.edited_pixel_count() == 0 {
            return Err(UiError::NothingSelected);
        }

        Ok(Submission {
            prompt,
            image_png: self.original.to_png()?,
            mask_png: mask.as_bitmap().to_png()?,
            mask_kind: MaskKind::Edit,
        })
    }
}

/// Packages the 2x expanded image and its preserve mask.
///
/// # Errors
/// - [`UiError::EmptyPrompt`] for a blank prompt.
/// - [`UiError::Mask`] / [`UiError::Core`] for expansion or encoding failures.
pub fn prepare_outpaint_submission(prompt: &str, source: &Bitmap) -> Result<Submission, UiError> {
    let prompt = non_blank(prompt)?;
    let expansion = build_expansion(source)?;

    Ok(Submission {
        prompt,
        image_png: expansion.expanded_image.to_png()?,
        mask_png: expansion.preserve_mask.as_bitmap().to_png()?,
        mask_kind: MaskKind::Preserve,
    })
}

fn non_blank(prompt: &str) -> Result<String, UiError> {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return Err(UiError::EmptyPrompt);
    }
    Ok(trimmed.to_string())
}

/// Ready-to-send edit-route submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Trimmed instruction.
    pub prompt: String,
    /// PNG image, same size as the mask.
    pub image_png: Vec<u8>,
    /// PNG mask.
    pub mask_png: Vec<u8>,
    /// Mask semantics.
    pub mask_kind: MaskKind,
}

/// One multipart field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormField {
    /// Text field.
    Text {
        /// Field name.
        name: &'static str,
        /// Field value.
        value: String,
    },
    /// File field.
    File {
        /// Field name.
        name: &'static str,
        /// Suggested filename.
        filename: &'static str,
        /// Media type.
        mime_type: &'static str,
        /// File contents.
        bytes: Vec<u8>,
    },
}

impl Submission {
    /// Multipart fields in send order.
    pub fn form_fields(&self) -> Vec<FormField> {
        vec![
            FormField::Text {
                name: "prompt",
                value: self.prompt.clone(),
            },
            FormField::Text {
                name: "maskKind",
                value: self.mask_kind.as_str().to_string(),
            },
            FormField::File {
                name: "image",
                filename: "image.png",
                mime_type: PNG_MEDIA_TYPE,
                bytes: self.image_png.clone(),
            },
            FormField::File {
                name: "mask",
                filename: "mask.png",
                mime_type: PNG_MEDIA_TYPE,
                bytes: self.mask_png.clone(),
            },
        ]
    }
}

/// Client-side errors.
#[derive(Debug, Error)]
pub enum UiError {
    /// A call for this view is still running.
    #[error("a request is already in progress")]
    InFlight,
    /// Prompt is blank.
    #[error("please enter a prompt")]
    EmptyPrompt,
    /// Strokes did not change any pixel.
    #[error("draw over the area you want to edit first")]
    NothingSelected,
    /// Compositing or stroke rendering failed.
    #[error("canvas error: {0}")]
    Canvas(#[from] CanvasError),
    /// Mask derivation or expansion failed.
    #[error("mask error: {0}")]
    Mask(#[from] MaskError),
    /// Encoding failed.
    #[error("image error: {0}")]
    Core(#[from] CoreError),
}

#[cfg(test)]
mod tests {
    //! Unit tests for the in-flight gate.

    use super::*;

    #[test]
    fn second_submit_is_refused_until_settled() {
        let mut view = FeatureView::new(FeatureKind::TextToImage);
        view.begin_submit().expect("first submit should start");
        assert!(matches!(view.begin_submit(), Err(UiError::InFlight)));

        view.settle(500, r#"{"message":"Failed to generate image"}"#);
        assert!(!view.is_in_flight());
        assert_eq!(view.error_message(), Some("Failed to generate image"));
        view.begin_submit().expect("submit after settle should start");
    }

    #[test]
    fn every_feature_has_a_view() {
        let mut state = ClientState::new("0.1.0");
        for kind in FeatureKind::ALL {
            assert!(state.view(kind).is_some());
        }
        state.switch_to(FeatureKind::Outpaint);
        assert_eq!(state.active, FeatureKind::Outpaint);
        assert_eq!(FeatureKind::WebhookTextToImage.route(), None);
    }
}
