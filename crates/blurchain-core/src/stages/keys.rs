//! Data keys shared by the blur stages.

/// Chain input: URI of the image to blur.
pub const SOURCE_IMAGE_REFERENCE: &str = "sourceImageReference";

/// Chain input: number of blur passes per blur stage. Positive.
pub const BLUR_INTENSITY: &str = "blurIntensity";

/// Blur output: URI of the latest blurred temporary.
pub const IMAGE_REF: &str = "imageRef";

/// Chain output: URI of the persisted result.
pub const FINAL_IMAGE_REFERENCE: &str = "finalImageReference";

/// Scope of the blur temporaries; cleanup deletes it.
pub const OUTPUT_SCOPE: &str = "blur_filter_outputs";

/// File name prefix of each blur temporary.
pub const OUTPUT_PREFIX: &str = "blur-filter-output-";

/// Name under which the demo pipeline is started.
pub const IMAGE_MANIPULATION_WORK_NAME: &str = "image_manipulation_work";
