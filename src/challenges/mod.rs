// Bot-mitigation challenge recognition shared by the HTTP pipeline and the browser layer.

pub mod detectors;
