/// Default confidence floor for the icon detector.
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.05;

/// IoU above which a text box and an icon box are considered the same region.
pub const CROSS_TYPE_IOU_THRESHOLD: f32 = 0.7;

/// IoU above which two boxes from the same detector are duplicates.
pub const SAME_TYPE_IOU_THRESHOLD: f32 = 0.8;

/// Icon score an icon box must exceed to win an overlap against a text box.
pub const ICON_SCORE_FLOOR: f32 = 0.25;

/// Minimum OCR confidence kept by the text detector adapter.
pub const TEXT_MIN_CONFIDENCE: f32 = 0.1;

/// Number of icon crops sent to the captioner per call.
pub const CAPTION_BATCH_SIZE: usize = 128;

/// Content used for an icon whose caption could not be generated.
pub const CAPTION_PLACEHOLDER: &str = "unknown";

/// Side length (pixels) icon crops are resized to before captioning.
pub const CAPTION_CROP_SIZE: u32 = 64;

/// Number of images analysed concurrently in batch mode.
pub const MAX_CONCURRENT_IMAGES: usize = 2;

/// Reference dimension for annotation stroke and label sizing.
///
/// Strokes and labels scale with `max(width, height) / ANNOTATION_REFERENCE_SIZE`.
pub const ANNOTATION_REFERENCE_SIZE: f32 = 3200.0;

/// Stroke color for text elements (RGBA).
pub const TEXT_COLOR: [u8; 4] = [30, 144, 255, 255];

/// Stroke color for icon elements (RGBA).
pub const ICON_COLOR: [u8; 4] = [255, 69, 0, 255];

pub const FONT: &[u8] = include_bytes!("../../fonts/DejaVuSans.ttf");

/// Required input width for the icon detection model.
pub const YOLO_INPUT_WIDTH: u32 = 640;

/// Required input height for the icon detection model.
pub const YOLO_INPUT_HEIGHT: u32 = 640;

/// The number of values representing bounding box coordinates in YOLO format.
///
/// YOLO format uses 4 values: [center_x, center_y, width, height]; class
/// scores start at this offset in every prediction column.
pub const CXYWH_OFFSET: usize = 4;

/// Background fill value for letterbox padding (144/255).
pub const BACKGROUND_FILL_VALUE: f32 = 144.0 / 255.0;

/// Required input side for the text detection model.
pub const PADDLE_DET_INPUT_SIZE: u32 = 960;

/// Required input height for the text recognition model.
pub const PADDLE_REC_INPUT_HEIGHT: u32 = 48;

/// Environment variable holding the captioning API key.
pub const OPENAI_API_KEY_ENV_NAME: &str = "OPENAI_API_KEY";

/// Environment variable overriding the captioning API base URL.
pub const OPENAI_BASE_URL_ENV_NAME: &str = "OPENAI_BASE_URL";

pub const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o";

pub const CAPTION_PROMPT: &str = "Describe the function of this UI icon in a few words \
(for example \"Save\", \"Bold\", \"Open settings\"). Reply with the description only.";
